// train.rs
// Description: Training driver. Streams windows from the dataset, runs forward with dropout,
//              logs the cross entropy of every example, backpropagates probabilities minus
//              targets and periodically writes the parameter blob.
// History:
// - 2026-10-18: One pass over the example stream with periodic checkpoints.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::Config;
use crate::dataset::Dataset;
use crate::error::{LlmError, Result};
use crate::llm::Llm;
use crate::math;
use crate::tokenizer::BpeTokenizer;

#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub d_dropout: f64,
    pub d_learning_rate: f64,
    /// Checkpoint when the example number is a multiple of this.
    pub i_checkpoint_every: usize,
    /// Where checkpoints go, `None` disables saving.
    pub opt_checkpoint_path: Option<PathBuf>,
    pub opt_max_examples: Option<usize>,
}

impl TrainOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            d_dropout: config.dropout,
            d_learning_rate: config.learning_rate,
            i_checkpoint_every: config.checkpoint_every,
            opt_checkpoint_path: Some(config.checkpoint_path.clone()),
            opt_max_examples: config.example_limit(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.d_learning_rate.is_finite() || self.d_learning_rate <= 0.0 {
            return Err(LlmError::InvalidParameter(format!(
                "learning rate {} must be finite and positive",
                self.d_learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.d_dropout) {
            return Err(LlmError::InvalidParameter(format!(
                "dropout {} must be in [0, 1)",
                self.d_dropout
            )));
        }
        if self.i_checkpoint_every == 0 {
            return Err(LlmError::InvalidParameter(
                "checkpoint interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainReport {
    pub i_examples: usize,
    pub i_checkpoints: usize,
    pub d_last_loss: f64,
    pub d_mean_loss: f64,
}

pub fn train(
    llm: &mut Llm,
    dataset: &Dataset,
    tokenizer: &BpeTokenizer,
    options: &TrainOptions,
) -> Result<TrainReport> {
    options.validate()?;
    tokenizer.require_training_tokens()?;
    if tokenizer.vocab_size() != llm.vocab_size() {
        return Err(LlmError::dims(
            "train",
            format!(
                "tokenizer has {} tokens, model has {}",
                tokenizer.vocab_size(),
                llm.vocab_size()
            ),
        ));
    }
    if dataset.context_size() > llm.context_size() {
        return Err(LlmError::dims(
            "train",
            format!(
                "dataset window {} exceeds model context {}",
                dataset.context_size(),
                llm.context_size()
            ),
        ));
    }

    info!(
        root = %dataset.root().display(),
        lr = options.d_learning_rate,
        dropout = options.d_dropout,
        "training started"
    );

    let mut report = TrainReport::default();
    let mut d_loss_sum = 0.0;

    for res in dataset.examples(tokenizer)? {
        let (i_index, example) = res?;

        let a_probs = llm.forward(&example.v_input, options.d_dropout)?;
        let d_loss = math::cross_entropy(&a_probs, &example.a_target)?;
        info!(example = i_index, loss = format_args!("{d_loss:.2}"), "loss");
        if !d_loss.is_finite() {
            warn!(example = i_index, "non finite loss");
        }

        let a_grads = &a_probs - &example.a_target;
        llm.backward(&a_grads, options.d_learning_rate)?;

        report.i_examples += 1;
        report.d_last_loss = d_loss;
        d_loss_sum += d_loss;

        if i_index % options.i_checkpoint_every == 0 {
            if let Some(path) = &options.opt_checkpoint_path {
                info!(example = i_index, "saving checkpoint");
                llm.save(path)?;
                report.i_checkpoints += 1;
            }
        }

        if options.opt_max_examples.is_some_and(|i_max| report.i_examples >= i_max) {
            info!(examples = report.i_examples, "example limit reached");
            break;
        }
    }

    if report.i_examples > 0 {
        report.d_mean_loss = d_loss_sum / report.i_examples as f64;
    }
    info!(
        examples = report.i_examples,
        mean_loss = report.d_mean_loss,
        "training finished"
    );
    Ok(report)
}
