// constants.rs
// Description: Default values and environment key names for the config builder.
// History:
// - 2026-10-18: Defaults taken from the former hard coded model constants.

/// Environment variable prefix (e.g. `LLM_SCRATCH_EMBEDDING_DIM`).
pub(crate) const ENV_PREFIX: &str = "LLM_SCRATCH_";

// Env key suffixes, full key = ENV_PREFIX + suffix.

pub(crate) const ENV_SEED: &str = "SEED";
pub(crate) const ENV_DATASET_PATH: &str = "DATASET_PATH";
pub(crate) const ENV_TOKENIZER_PATH: &str = "TOKENIZER_PATH";
pub(crate) const ENV_CHECKPOINT_PATH: &str = "CHECKPOINT_PATH";
pub(crate) const ENV_CONTEXT_SIZE: &str = "CONTEXT_SIZE";
pub(crate) const ENV_EMBEDDING_DIM: &str = "EMBEDDING_DIM";
pub(crate) const ENV_NUM_LAYERS: &str = "NUM_LAYERS";
pub(crate) const ENV_NUM_HEADS: &str = "NUM_HEADS";
pub(crate) const ENV_DROPOUT: &str = "DROPOUT";
pub(crate) const ENV_LEARNING_RATE: &str = "LEARNING_RATE";
pub(crate) const ENV_CHECKPOINT_EVERY: &str = "CHECKPOINT_EVERY";
pub(crate) const ENV_MAX_EXAMPLES: &str = "MAX_EXAMPLES";

// Defaults.

pub(crate) const DEFAULT_SEED: u64 = 42;
pub(crate) const DEFAULT_DATASET_PATH: &str = "data/corpus";
pub(crate) const DEFAULT_TOKENIZER_PATH: &str = "data/vocab.txt";
pub(crate) const DEFAULT_CHECKPOINT_PATH: &str = "checkpoints/llm_params.bin";
pub(crate) const DEFAULT_CONTEXT_SIZE: usize = 80;
pub(crate) const DEFAULT_EMBEDDING_DIM: usize = 128;
pub(crate) const DEFAULT_NUM_LAYERS: usize = 3;
pub(crate) const DEFAULT_NUM_HEADS: usize = 4;
pub(crate) const DEFAULT_DROPOUT: f64 = 0.1;
pub(crate) const DEFAULT_LEARNING_RATE: f64 = 0.0005;
pub(crate) const DEFAULT_CHECKPOINT_EVERY: usize = 1000;
pub(crate) const DEFAULT_MAX_EXAMPLES: usize = 0;
