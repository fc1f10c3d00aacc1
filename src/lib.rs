// lib.rs
// Description: Crate root. A small transformer language model with hand derived
//              backpropagation: matrix primitives, attention, feed forward blocks,
//              transformer layers, the tied embedding model, a fixed vocabulary tokenizer,
//              corpus windowing and the training driver.
// History:
// - 2026-10-18: Split the binary into a library plus a thin menu front end.

pub mod attention;
pub mod config;
pub mod dataset;
pub mod error;
pub mod feed_forward;
pub mod layer;
pub mod llm;
pub mod math;
pub mod tokenizer;
pub mod train;
pub mod utils;

pub use attention::{Head, MultiHeadAttention};
pub use config::{Config, ConfigError};
pub use dataset::{Dataset, DirReader, Examples, TrainingExample};
pub use error::{LlmError, Result};
pub use feed_forward::{FeedForward, FeedForwardLayer};
pub use layer::{Layer, TransformerLayer};
pub use llm::{residual_scales, Llm};
pub use tokenizer::{BpeTokenizer, BpeTokenizerCheckpoint, SpecialTokens};
pub use train::{train, TrainOptions, TrainReport};
