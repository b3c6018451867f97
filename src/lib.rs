//! # rnnlm
//!
//! Recurrent language models trained with truncated backpropagation through
//! time, on top of `ndarray` with hand-written backward passes.
//!
//! ## Core Components
//!
//! - **Vocabulary**: token/index mapping with reserved `<pad>`, `<s>`, `</s>`, `<unk>`
//! - **Corpus**: line-wise encoding of a text file into one index sequence
//! - **Batching**: contiguous streams cut into BPTT windows
//! - **Model**: embedding, stacked RNN/GRU/LSTM cells and a vocabulary projection
//! - **Training**: Adam, global-norm clipping, explicit hidden-state carry, perplexity
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::Cursor;
//! use rand::{rngs::StdRng, SeedableRng};
//! use rnnlm::{corpus, BatchSegmenter, ModelConfig, RnnLm, TrainingConfig, Vocabulary};
//! use rnnlm::training::create_adam_trainer;
//!
//! let text = "the cat sat\nthe dog sat\n";
//! let vocab = Vocabulary::build_from_reader(Cursor::new(text)).unwrap();
//! let ids = corpus::encode_reader(&vocab, Cursor::new(text)).unwrap();
//!
//! let config = ModelConfig { emb_dim: 8, hid_dim: 8, dropout: 0.0, ..ModelConfig::default() };
//! let mut rng = StdRng::seed_from_u64(0);
//! let model = RnnLm::new(&config, vocab.size(), &mut rng).unwrap();
//!
//! let mut trainer = create_adam_trainer(model, TrainingConfig::default());
//! let batches = BatchSegmenter::new(&ids, 2, 3).unwrap();
//! let stats = trainer.evaluate(&batches).unwrap();
//! assert!(stats.perplexity > 1.0);
//! ```

pub mod error;
pub mod utils;
pub mod vocab;
pub mod corpus;
pub mod batching;
pub mod layers;
pub mod state;
pub mod models;
pub mod loss;
pub mod optimizers;
pub mod config;
pub mod training;

// Re-export commonly used items
pub use batching::{Batch, BatchSegmenter};
pub use config::{ModelConfig, RunConfig, TrainingConfig};
pub use error::{Error, Result};
pub use layers::recurrent::CellKind;
pub use models::rnn_lm::RnnLm;
pub use optimizers::{Adam, Optimizer};
pub use state::{CarriedState, HiddenState};
pub use training::{LmTrainer, TrainingReport};
pub use vocab::Vocabulary;
