/// Stacked recurrent language model.
pub mod rnn_lm;
