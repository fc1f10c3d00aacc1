// builder.rs
// Description: Config from environment variables. Unset keys keep the default, a key that is
//              set but does not parse is an error.
// History:
// - 2026-10-18: LLM_SCRATCH_* keys for every Config field.

use std::path::{Path, PathBuf};

use super::constants::{
    ENV_CHECKPOINT_EVERY, ENV_CHECKPOINT_PATH, ENV_CONTEXT_SIZE, ENV_DATASET_PATH, ENV_DROPOUT,
    ENV_EMBEDDING_DIM, ENV_LEARNING_RATE, ENV_MAX_EXAMPLES, ENV_NUM_HEADS, ENV_NUM_LAYERS,
    ENV_PREFIX, ENV_SEED, ENV_TOKENIZER_PATH,
};
use super::Config;
use super::ConfigError;

/// Returns the full environment key for a suffix (`SEED` becomes `LLM_SCRATCH_SEED`).
#[must_use]
pub fn env_key(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

/// Reads an environment variable as a string, `None` when unset.
pub fn env_string(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(s) => Ok(Some(s)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::EnvVar {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Reads an environment variable and parses it into `T`, `None` when unset.
pub fn env_parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let s_value = match env_string(key)? {
        Some(s) => s,
        None => return Ok(None),
    };
    match s_value.trim().parse() {
        Ok(t) => Ok(Some(t)),
        Err(e) => Err(ConfigError::Parse {
            key: key.to_string(),
            value: s_value,
            message: e.to_string(),
        }),
    }
}

fn env_path(suffix: &str, default: &Path) -> Result<PathBuf, ConfigError> {
    Ok(env_string(&env_key(suffix))?
        .map(PathBuf::from)
        .unwrap_or_else(|| default.to_path_buf()))
}

/// Builds [`Config`] from `LLM_SCRATCH_*` variables.
///
/// Does not validate; call [`Config::validate`] before use.
pub fn from_env() -> Result<Config, ConfigError> {
    let default = Config::default();

    Ok(Config {
        seed: env_parsed::<u64>(&env_key(ENV_SEED))?.unwrap_or(default.seed),
        dataset_path: env_path(ENV_DATASET_PATH, &default.dataset_path)?,
        tokenizer_path: env_path(ENV_TOKENIZER_PATH, &default.tokenizer_path)?,
        checkpoint_path: env_path(ENV_CHECKPOINT_PATH, &default.checkpoint_path)?,
        context_size: env_parsed::<usize>(&env_key(ENV_CONTEXT_SIZE))?
            .unwrap_or(default.context_size),
        embedding_dim: env_parsed::<usize>(&env_key(ENV_EMBEDDING_DIM))?
            .unwrap_or(default.embedding_dim),
        num_layers: env_parsed::<usize>(&env_key(ENV_NUM_LAYERS))?.unwrap_or(default.num_layers),
        num_heads: env_parsed::<usize>(&env_key(ENV_NUM_HEADS))?.unwrap_or(default.num_heads),
        dropout: env_parsed::<f64>(&env_key(ENV_DROPOUT))?.unwrap_or(default.dropout),
        learning_rate: env_parsed::<f64>(&env_key(ENV_LEARNING_RATE))?
            .unwrap_or(default.learning_rate),
        checkpoint_every: env_parsed::<usize>(&env_key(ENV_CHECKPOINT_EVERY))?
            .unwrap_or(default.checkpoint_every),
        max_examples: env_parsed::<usize>(&env_key(ENV_MAX_EXAMPLES))?
            .unwrap_or(default.max_examples),
    })
}
