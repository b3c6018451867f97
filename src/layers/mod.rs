/// Token embedding table.
pub mod embedding;

/// Inverted dropout.
pub mod dropout;

/// Fully connected projection.
pub mod linear;

/// Elman (tanh) recurrent cell.
pub mod rnn_cell;

/// GRU cell.
pub mod gru_cell;

/// LSTM cell.
pub mod lstm_cell;

/// Sum type over the recurrent cells.
pub mod recurrent;
