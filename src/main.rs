// main.rs
// Description: Binary entry point with menu loop. Loads configuration and tokenizer, builds a
//              seeded model sized to the vocabulary, trains on the configured corpus, saves and
//              loads parameters and answers prompts with greedy decoding.
// History:
// - 2026-10-18: Configuration from LLM_SCRATCH_* environment variables.
// - 2026-10-18: Parameters and tokenizer saved as separate binary blobs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};

use llm_scratch::config::{self, Config};
use llm_scratch::{train, BpeTokenizer, Dataset, Llm, SpecialTokens, TrainOptions};

const I_MAX_NEW_TOKENS: usize = 40;

fn read_line_trimmed() -> Result<String, String> {
    let mut s_input = String::new();
    std::io::stdin()
        .read_line(&mut s_input)
        .map_err(|e| format!("input_read_error: {e}"))?;
    Ok(s_input.trim().to_string())
}

fn prompt_path(s_label: &str, current: &Path) -> Result<PathBuf, String> {
    print!("{} [{}]: ", s_label, current.display());
    let _ = std::io::stdout().flush();
    let s_path = read_line_trimmed()?;
    Ok(if s_path.is_empty() {
        current.to_path_buf()
    } else {
        PathBuf::from(s_path)
    })
}

fn tokenizer_blob_path(params_path: &Path) -> PathBuf {
    params_path.with_extension("tokenizer.bin")
}

// A .txt file is a vocabulary list, anything else a saved tokenizer blob.
fn load_tokenizer(path: &Path) -> llm_scratch::Result<BpeTokenizer> {
    if path.extension().is_some_and(|ext| ext == "txt") {
        BpeTokenizer::from_vocab_file(path, SpecialTokens::default())
    } else {
        BpeTokenizer::load(path)
    }
}

fn build_llm(config: &Config, tokenizer: &BpeTokenizer) -> llm_scratch::Result<Llm> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    Llm::new(
        tokenizer.vocab_size(),
        config.context_size,
        config.embedding_dim,
        config.num_layers,
        config.num_heads,
        &mut rng,
    )
}

fn print_model_info(llm: &Llm, config: &Config) {
    println!("\n=== MODEL INFORMATION ===");
    println!("Network architecture: {}", llm.network_description());
    println!(
        "Model configuration -> context_size: {}, embedding_dim: {}, layers: {}, heads: {}, head_dim: {}",
        llm.context_size(),
        llm.model_dim(),
        llm.v_layers.len(),
        config.num_heads,
        config.head_dim()
    );
    println!("Total parameters: {}", llm.parameter_count());
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let tokenizer = match load_tokenizer(&config.tokenizer_path) {
        Ok(t) => t,
        Err(e) => {
            error!(path = %config.tokenizer_path.display(), "tokenizer load failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut llm = match build_llm(&config, &tokenizer) {
        Ok(m) => m,
        Err(e) => {
            error!("model construction failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(seed = config.seed, vocab = tokenizer.vocab_size(), "model initialized");
    print_model_info(&llm, &config);

    let mut checkpoint_path = config.checkpoint_path.clone();

    loop {
        println!("\n--- Menu Mode ---");
        println!("Commands:");
        println!("  t Train");
        println!("  s Save parameters");
        println!("  l Load parameters");
        println!("  a Ask");
        println!("  i Model info");
        println!("  e Exit");
        print!("\nEnter command: ");
        let _ = std::io::stdout().flush();

        let s_cmd = match read_line_trimmed() {
            Ok(s) => s.to_lowercase(),
            Err(e) => {
                println!("Input error: {}", e);
                continue;
            }
        };

        match s_cmd.as_str() {
            "e" => {
                println!("Exit.");
                return ExitCode::SUCCESS;
            }
            "t" => {
                let dataset = match Dataset::new(&config.dataset_path, config.context_size) {
                    Ok(d) => d,
                    Err(e) => {
                        println!("Dataset error: {}", e);
                        continue;
                    }
                };
                let mut options = TrainOptions::from_config(&config);
                options.opt_checkpoint_path = Some(checkpoint_path.clone());

                match train(&mut llm, &dataset, &tokenizer, &options) {
                    Ok(report) => println!(
                        "Trained on {} examples, mean loss {:.4}, last loss {:.4}",
                        report.i_examples, report.d_mean_loss, report.d_last_loss
                    ),
                    Err(e) => {
                        error!("training aborted: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "s" => {
                checkpoint_path = match prompt_path("Parameter file", &checkpoint_path) {
                    Ok(p) => p,
                    Err(e) => {
                        println!("Input error: {}", e);
                        continue;
                    }
                };
                let tokenizer_path = tokenizer_blob_path(&checkpoint_path);
                let res = llm
                    .save(&checkpoint_path)
                    .and_then(|_| tokenizer.save(&tokenizer_path));
                match res {
                    Ok(()) => println!(
                        "Saved parameters to {} and tokenizer to {}",
                        checkpoint_path.display(),
                        tokenizer_path.display()
                    ),
                    Err(e) => println!("Save failed: {}", e),
                }
            }
            "l" => {
                checkpoint_path = match prompt_path("Parameter file", &checkpoint_path) {
                    Ok(p) => p,
                    Err(e) => {
                        println!("Input error: {}", e);
                        continue;
                    }
                };
                match Llm::load(&checkpoint_path) {
                    Ok(loaded) if loaded.vocab_size() != tokenizer.vocab_size() => println!(
                        "Load failed: parameters expect {} tokens, tokenizer has {}",
                        loaded.vocab_size(),
                        tokenizer.vocab_size()
                    ),
                    Ok(loaded) => {
                        llm = loaded;
                        println!("Loaded parameters: {}", checkpoint_path.display());
                    }
                    Err(e) => println!("Load failed: {}", e),
                }
            }
            "a" => {
                print!("Enter prompt: ");
                let _ = std::io::stdout().flush();
                let s_user = match read_line_trimmed() {
                    Ok(s) => s,
                    Err(e) => {
                        println!("Input error: {}", e);
                        continue;
                    }
                };

                let v_prompt = tokenizer.encode_text(&s_user);
                if v_prompt.is_empty() {
                    println!("Empty prompt.");
                    continue;
                }
                let opt_stop = tokenizer.index_of(&tokenizer.special().s_eot);
                match llm.generate(&v_prompt, I_MAX_NEW_TOKENS, opt_stop) {
                    Ok(v_ids) => println!("Model output: {}", tokenizer.decode_ids(&v_ids)),
                    Err(e) => println!("Model output error: {}", e),
                }
            }
            "i" => print_model_info(&llm, &config),
            _ => println!("Unknown command."),
        }
    }
}
