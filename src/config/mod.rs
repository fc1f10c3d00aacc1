// mod.rs
// Description: Model, training and path configuration. Built from LLM_SCRATCH_* environment
//              variables on top of the defaults, then checked with Config::validate.
// History:
// - 2026-10-18: Move hard coded model constants into an environment driven config.

mod builder;
mod constants;
mod error;

use std::path::PathBuf;

use constants::{
    DEFAULT_CHECKPOINT_EVERY, DEFAULT_CHECKPOINT_PATH, DEFAULT_CONTEXT_SIZE, DEFAULT_DATASET_PATH,
    DEFAULT_DROPOUT, DEFAULT_EMBEDDING_DIM, DEFAULT_LEARNING_RATE, DEFAULT_MAX_EXAMPLES,
    DEFAULT_NUM_HEADS, DEFAULT_NUM_LAYERS, DEFAULT_SEED, DEFAULT_TOKENIZER_PATH,
};

pub use builder::{env_key, env_parsed, env_string, from_env};
pub use error::ConfigError;

/// Central configuration for the model and the training driver.
#[derive(Clone, Debug)]
pub struct Config {
    pub seed: u64,
    // Corpus root, walked recursively.
    pub dataset_path: PathBuf,
    // Tokenizer blob, or a .txt vocabulary with one token per line.
    pub tokenizer_path: PathBuf,
    pub checkpoint_path: PathBuf,

    // Rows of the positional matrix.
    pub context_size: usize,
    // Must be divisible by num_heads.
    pub embedding_dim: usize,
    pub num_layers: usize,
    pub num_heads: usize,

    pub dropout: f64,
    pub learning_rate: f64,
    pub checkpoint_every: usize,
    // 0 means the whole corpus.
    pub max_examples: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            dataset_path: PathBuf::from(DEFAULT_DATASET_PATH),
            tokenizer_path: PathBuf::from(DEFAULT_TOKENIZER_PATH),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            context_size: DEFAULT_CONTEXT_SIZE,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            num_layers: DEFAULT_NUM_LAYERS,
            num_heads: DEFAULT_NUM_HEADS,
            dropout: DEFAULT_DROPOUT,
            learning_rate: DEFAULT_LEARNING_RATE,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            max_examples: DEFAULT_MAX_EXAMPLES,
        }
    }
}

impl Config {
    /// Checks dimensions and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_heads == 0 {
            return Err(ConfigError::Validation(
                "num_heads must be greater than 0".to_string(),
            ));
        }
        if self.embedding_dim == 0 || self.embedding_dim % self.num_heads != 0 {
            return Err(ConfigError::Validation(format!(
                "embedding_dim ({}) must be a positive multiple of num_heads ({})",
                self.embedding_dim, self.num_heads
            )));
        }
        if self.context_size == 0 {
            return Err(ConfigError::Validation(
                "context_size must be greater than 0".to_string(),
            ));
        }
        if self.num_layers == 0 {
            return Err(ConfigError::Validation(
                "num_layers must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Validation(
                "dropout must be in [0, 1)".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::Validation(
                "learning_rate must be finite and positive".to_string(),
            ));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::Validation(
                "checkpoint_every must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Width of one attention head.
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.embedding_dim / self.num_heads
    }

    /// `max_examples` as an option, 0 meaning no limit.
    #[must_use]
    pub fn example_limit(&self) -> Option<usize> {
        if self.max_examples == 0 {
            None
        } else {
            Some(self.max_examples)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::constants::{ENV_EMBEDDING_DIM, ENV_NUM_HEADS, ENV_SEED};
    use super::*;

    // Env tests share process state.
    static CONFIG_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_width_not_divisible_by_heads() {
        let cfg = Config {
            embedding_dim: 30,
            num_heads: 4,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_rejects_zero_heads_layers_and_context() {
        for cfg in [
            Config {
                num_heads: 0,
                ..Config::default()
            },
            Config {
                num_layers: 0,
                ..Config::default()
            },
            Config {
                context_size: 0,
                ..Config::default()
            },
        ] {
            assert!(cfg.validate().is_err());
        }
    }

    #[test]
    fn validate_rejects_dropout_and_learning_rate_out_of_range() {
        let cfg = Config {
            dropout: 1.0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            learning_rate: f64::NAN,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn head_dim_and_example_limit() {
        let cfg = Config {
            embedding_dim: 64,
            num_heads: 8,
            max_examples: 0,
            ..Config::default()
        };
        assert_eq!(cfg.head_dim(), 8);
        assert_eq!(cfg.example_limit(), None);
        let cfg = Config {
            max_examples: 5,
            ..cfg
        };
        assert_eq!(cfg.example_limit(), Some(5));
    }

    #[test]
    fn from_env_overrides_and_falls_back() {
        let _g = CONFIG_ENV_LOCK.lock().unwrap();
        let key_dim = env_key(ENV_EMBEDDING_DIM);
        let key_heads = env_key(ENV_NUM_HEADS);
        std::env::set_var(&key_dim, "32");
        std::env::set_var(&key_heads, "2");
        std::env::remove_var(env_key(ENV_SEED));
        let cfg = from_env().unwrap();
        std::env::remove_var(&key_dim);
        std::env::remove_var(&key_heads);
        assert_eq!(cfg.embedding_dim, 32);
        assert_eq!(cfg.num_heads, 2);
        assert_eq!(cfg.seed, Config::default().seed);
    }

    #[test]
    fn from_env_reports_parse_errors() {
        let _g = CONFIG_ENV_LOCK.lock().unwrap();
        let key = env_key(ENV_SEED);
        std::env::set_var(&key, "not_a_number");
        let res = from_env();
        std::env::remove_var(&key);
        match res {
            Err(e @ ConfigError::Parse { .. }) => {
                assert!(e.to_string().contains("LLM_SCRATCH_SEED"));
                assert!(e.to_string().contains("not_a_number"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn env_helpers_return_none_when_unset() {
        assert_eq!(env_string("LLM_SCRATCH_UNLIKELY_KEY_4711").unwrap(), None);
        assert_eq!(
            env_parsed::<usize>("LLM_SCRATCH_UNLIKELY_KEY_0815").unwrap(),
            None
        );
    }
}
