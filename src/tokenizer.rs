// tokenizer.rs
// Description: Fixed vocabulary sub word tokenizer. Text is lower cased and split into words,
//              every word gets the end of word marker and is covered greedily by the longest
//              vocabulary entries. Vocabulary learning is out of scope: tokenizers are built
//              from a token list, a one token per line text file, or a saved blob.
// History:
// - 2026-10-18: Greedy longest match with end of word marker and unknown fallback.
// - 2026-10-18: Binary tokenizer blob with designated tokens.
// - 2026-10-18: Word splitting on Unicode word boundaries.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{LlmError, Result};
use crate::utils;

pub const S_EOW: &str = "</w>";
pub const S_UNK: &str = "<unk>";
pub const S_EOT: &str = "</eot>";
pub const S_PAD: &str = "</pad>";

const TOKENIZER_MAGIC: &str = "LLMSCRATCH-TOKENIZER";
const TOKENIZER_VERSION: u32 = 1;

/// Designated tokens. End of word and unknown must always be in the vocabulary,
/// end of text and padding only once training starts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub s_eow: String,
    pub s_unk: String,
    pub s_eot: String,
    pub s_pad: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            s_eow: S_EOW.to_string(),
            s_unk: S_UNK.to_string(),
            s_eot: S_EOT.to_string(),
            s_pad: S_PAD.to_string(),
        }
    }
}

/// Persisted form: token to index map plus the designated tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BpeTokenizerCheckpoint {
    pub m_vocab: BTreeMap<String, usize>,
    pub special: SpecialTokens,
}

#[derive(Clone, Debug)]
pub struct BpeTokenizer {
    m_token_to_id: HashMap<String, usize>,
    v_id_to_token: Vec<String>,
    special: SpecialTokens,
    i_eow_id: usize,
    i_unk_id: usize,
}

impl BpeTokenizer {
    /// Index of each token is its position in `v_tokens`.
    pub fn from_tokens(v_tokens: Vec<String>, special: SpecialTokens) -> Result<Self> {
        let mut m_token_to_id = HashMap::with_capacity(v_tokens.len());
        for (i_id, s_tok) in v_tokens.iter().enumerate() {
            if m_token_to_id.insert(s_tok.clone(), i_id).is_some() {
                return Err(LlmError::InvalidParameter(format!(
                    "duplicate vocabulary token {s_tok:?}"
                )));
            }
        }
        Self::build(m_token_to_id, v_tokens, special)
    }

    /// One token per line. Blank lines are skipped, a trailing `\r` is stripped.
    pub fn from_vocab_file(path: &Path, special: SpecialTokens) -> Result<Self> {
        let s_text = std::fs::read_to_string(path)?;
        let v_tokens: Vec<String> = s_text
            .lines()
            .map(|s_line| s_line.trim_end_matches('\r'))
            .filter(|s_line| !s_line.is_empty())
            .map(str::to_string)
            .collect();
        let tokenizer = Self::from_tokens(v_tokens, special)?;
        info!(
            path = %path.display(),
            vocab = tokenizer.vocab_size(),
            "loaded vocabulary list"
        );
        Ok(tokenizer)
    }

    pub fn from_checkpoint(cp: &BpeTokenizerCheckpoint) -> Result<Self> {
        let mut v_slots: Vec<Option<String>> = vec![None; cp.m_vocab.len()];
        for (s_tok, &i_id) in &cp.m_vocab {
            let slot = v_slots
                .get_mut(i_id)
                .filter(|slot| slot.is_none())
                .ok_or_else(|| {
                    LlmError::MalformedState(format!(
                        "tokenizer index {i_id} of {s_tok:?} is duplicated or out of range"
                    ))
                })?;
            *slot = Some(s_tok.clone());
        }
        let v_id_to_token = v_slots
            .into_iter()
            .collect::<Option<Vec<String>>>()
            .ok_or_else(|| LlmError::MalformedState("tokenizer indices are not dense".to_string()))?;
        let m_token_to_id = cp.m_vocab.iter().map(|(s, &i)| (s.clone(), i)).collect();
        Self::build(m_token_to_id, v_id_to_token, cp.special.clone())
    }

    fn build(
        m_token_to_id: HashMap<String, usize>,
        v_id_to_token: Vec<String>,
        special: SpecialTokens,
    ) -> Result<Self> {
        let lookup = |s_tok: &str| -> Result<usize> {
            if s_tok.is_empty() {
                return Err(LlmError::MissingToken(s_tok.to_string()));
            }
            m_token_to_id
                .get(s_tok)
                .copied()
                .ok_or_else(|| LlmError::MissingToken(s_tok.to_string()))
        };
        let i_eow_id = lookup(&special.s_eow)?;
        let i_unk_id = lookup(&special.s_unk)?;

        Ok(Self {
            m_token_to_id,
            v_id_to_token,
            special,
            i_eow_id,
            i_unk_id,
        })
    }

    pub fn to_checkpoint(&self) -> BpeTokenizerCheckpoint {
        BpeTokenizerCheckpoint {
            m_vocab: self
                .m_token_to_id
                .iter()
                .map(|(s, &i)| (s.clone(), i))
                .collect(),
            special: self.special.clone(),
        }
    }

    pub fn special(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn vocab_size(&self) -> usize {
        self.v_id_to_token.len()
    }

    pub fn has(&self, s_tok: &str) -> bool {
        self.m_token_to_id.contains_key(s_tok)
    }

    pub fn index_of(&self, s_tok: &str) -> Option<usize> {
        self.m_token_to_id.get(s_tok).copied()
    }

    pub fn require_index(&self, s_tok: &str) -> Result<usize> {
        self.index_of(s_tok)
            .ok_or_else(|| LlmError::MissingToken(s_tok.to_string()))
    }

    pub fn token_at(&self, i_id: usize) -> Option<&str> {
        self.v_id_to_token.get(i_id).map(String::as_str)
    }

    /// End of text and padding indices, both required before training.
    pub fn require_training_tokens(&self) -> Result<(usize, usize)> {
        Ok((
            self.require_index(&self.special.s_eot)?,
            self.require_index(&self.special.s_pad)?,
        ))
    }

    pub fn encode_text(&self, s_text: &str) -> Vec<usize> {
        let s_lower = s_text.to_lowercase();
        let mut v_ids = Vec::with_capacity(s_lower.len() / 2);
        for s_word in split_words(&s_lower) {
            v_ids.extend(self.encode_word(s_word));
        }
        v_ids
    }

    pub fn encode_word(&self, s_word: &str) -> Vec<usize> {
        let s_full = format!("{s_word}{}", self.special.s_eow);
        let i_len = s_full.len();
        let i_stem_end = i_len - self.special.s_eow.len();
        let mut v_ids = Vec::with_capacity(4);

        let mut i = 0;
        'outer: while i < i_len {
            let mut j = i_len;
            while j > i {
                if let Some(&i_id) = self.m_token_to_id.get(&s_full[i..j]) {
                    v_ids.push(i_id);
                    i = j;
                    continue 'outer;
                }
                // First shrink drops the whole marker, then one character at a time.
                j = if j == i_len {
                    i_stem_end
                } else {
                    prev_char_boundary(&s_full, j)
                };
            }
            v_ids.push(self.i_unk_id);
            i = next_char_boundary(&s_full, i);
        }

        v_ids
    }

    /// Joins tokens, turning the end of word marker into a space.
    pub fn decode_ids(&self, v_ids: &[usize]) -> String {
        let s_eow = self.special.s_eow.as_str();
        let mut s_out = String::new();
        for &i_id in v_ids {
            let s_tok = self.token_at(i_id).unwrap_or(self.special.s_unk.as_str());
            if i_id == self.i_eow_id {
                s_out.push(' ');
            } else if let Some(s_stem) = s_tok.strip_suffix(s_eow) {
                s_out.push_str(s_stem);
                s_out.push(' ');
            } else {
                s_out.push_str(s_tok);
            }
        }
        s_out.trim_end().to_string()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        utils::encode_blob(TOKENIZER_MAGIC, TOKENIZER_VERSION, &self.to_checkpoint())
    }

    pub fn from_bytes(v_bytes: &[u8]) -> Result<Self> {
        let cp: BpeTokenizerCheckpoint =
            utils::decode_blob(TOKENIZER_MAGIC, TOKENIZER_VERSION, v_bytes)?;
        Self::from_checkpoint(&cp).map_err(|e| match e {
            LlmError::MissingToken(s) => {
                LlmError::MalformedState(format!("tokenizer blob lacks token {s:?}"))
            }
            other => other,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        utils::write_file_atomic(path, &self.to_bytes()?)?;
        info!(path = %path.display(), vocab = self.vocab_size(), "saved tokenizer");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

fn prev_char_boundary(s: &str, i: usize) -> usize {
    let mut j = i.saturating_sub(1);
    while j > 0 && !s.is_char_boundary(j) {
        j -= 1;
    }
    j
}

fn next_char_boundary(s: &str, i: usize) -> usize {
    let mut j = i + 1;
    while j < s.len() && !s.is_char_boundary(j) {
        j += 1;
    }
    j
}

/// Unicode word-boundary segments of `s_text` with whitespace runs dropped.
pub fn split_words(s_text: &str) -> Vec<&str> {
    s_text
        .split_word_bounds()
        .filter(|s_seg| !s_seg.chars().all(char::is_whitespace))
        .collect()
}
