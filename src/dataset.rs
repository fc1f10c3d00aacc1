// dataset.rs
// Description: Training corpus access. DirReader walks a directory tree depth first in file
//              name order; Dataset turns every file into overlapping windows of token indices
//              with one hot next token targets, padding the tail of each file.
// History:
// - 2026-10-18: Lazy restartable example stream with half window stride.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::{debug, info};

use crate::error::{LlmError, Result};
use crate::math;
use crate::tokenizer::BpeTokenizer;

/// Lazy depth first traversal yielding `(path, contents)` for every regular file.
/// Entries of each directory are visited in sorted file name order.
pub struct DirReader {
    v_stack: Vec<std::vec::IntoIter<PathBuf>>,
}

impl DirReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            v_stack: vec![vec![root.into()].into_iter()],
        }
    }

    fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut v_paths = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<PathBuf>>>()?;
        v_paths.sort();
        Ok(v_paths)
    }
}

impl Iterator for DirReader {
    type Item = Result<(PathBuf, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let opt_path = self.v_stack.last_mut()?.next();
            let path = match opt_path {
                Some(p) => p,
                None => {
                    self.v_stack.pop();
                    continue;
                }
            };

            if path.is_dir() {
                match Self::sorted_entries(&path) {
                    Ok(v_entries) => self.v_stack.push(v_entries.into_iter()),
                    Err(e) => return Some(Err(e)),
                }
                continue;
            }

            return Some(
                fs::read(&path)
                    .map(|v_bytes| (path, String::from_utf8_lossy(&v_bytes).into_owned()))
                    .map_err(LlmError::from),
            );
        }
    }
}

/// One window: `v_input` token indices and the one hot matrix of the tokens that follow them.
#[derive(Clone, Debug)]
pub struct TrainingExample {
    pub v_input: Vec<usize>,
    pub a_target: Array2<f64>,
}

#[derive(Clone, Debug)]
pub struct Dataset {
    root: PathBuf,
    i_context_size: usize,
}

impl Dataset {
    pub fn new(root: impl Into<PathBuf>, i_context_size: usize) -> Result<Self> {
        if i_context_size == 0 {
            return Err(LlmError::InvalidParameter(
                "context size must be positive".to_string(),
            ));
        }
        Ok(Self {
            root: root.into(),
            i_context_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context_size(&self) -> usize {
        self.i_context_size
    }

    /// Starts a fresh pass over the corpus. Example numbering starts at 1.
    pub fn examples<'a>(&self, tokenizer: &'a BpeTokenizer) -> Result<Examples<'a>> {
        let (i_eot_id, i_pad_id) = tokenizer.require_training_tokens()?;
        Ok(Examples {
            reader: DirReader::new(self.root.clone()),
            tokenizer,
            i_context_size: self.i_context_size,
            i_stride: (self.i_context_size / 2).max(1),
            i_eot_id,
            i_pad_id,
            opt_file: None,
            i_count: 0,
        })
    }
}

struct FileWindows {
    path: PathBuf,
    v_tokens: Vec<usize>,
    i_original_len: usize,
    i_pos: usize,
    b_done: bool,
}

pub struct Examples<'a> {
    reader: DirReader,
    tokenizer: &'a BpeTokenizer,
    i_context_size: usize,
    i_stride: usize,
    i_eot_id: usize,
    i_pad_id: usize,
    opt_file: Option<FileWindows>,
    i_count: usize,
}

impl Examples<'_> {
    fn next_window(&mut self) -> Option<Result<TrainingExample>> {
        let i_ctx = self.i_context_size;
        let file = self.opt_file.as_mut()?;
        if file.b_done || file.i_pos + 1 >= file.i_original_len {
            return None;
        }

        let i = file.i_pos;
        if file.v_tokens.len() < i + i_ctx + 1 {
            file.v_tokens.resize(i + i_ctx + 1, self.i_pad_id);
            file.b_done = true;
        }
        file.i_pos += self.i_stride;

        let v_input = file.v_tokens[i..i + i_ctx].to_vec();
        Some(
            math::one_hot(&file.v_tokens[i + 1..i + i_ctx + 1], self.tokenizer.vocab_size())
                .map(|a_target| TrainingExample { v_input, a_target }),
        )
    }
}

impl Iterator for Examples<'_> {
    type Item = Result<(usize, TrainingExample)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(res) = self.next_window() {
                self.i_count += 1;
                return Some(res.map(|example| (self.i_count, example)));
            }

            if let Some(file) = self.opt_file.take() {
                info!(path = %file.path.display(), "finished file");
            }

            let (path, s_text) = match self.reader.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            let mut v_tokens = self.tokenizer.encode_text(&s_text);
            v_tokens.push(self.i_eot_id);
            debug!(path = %path.display(), tokens = v_tokens.len(), "reading file");

            self.opt_file = Some(FileWindows {
                path,
                i_original_len: v_tokens.len(),
                v_tokens,
                i_pos: 0,
                b_done: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{SpecialTokens, S_EOT, S_EOW, S_PAD, S_UNK};

    // Ids: </w>=0 <unk>=1 </eot>=2 </pad>=3 a</w>=4 b</w>=5 c</w>=6
    fn tokenizer() -> BpeTokenizer {
        let v_tokens = [S_EOW, S_UNK, S_EOT, S_PAD, "a</w>", "b</w>", "c</w>"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        BpeTokenizer::from_tokens(v_tokens, SpecialTokens::default()).unwrap()
    }

    fn write(root: &Path, s_rel: &str, s_text: &str) {
        let path = root.join(s_rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, s_text).unwrap();
    }

    #[test]
    fn dir_reader_walks_depth_first_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b/z.txt", "bz");
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "b/c/d.txt", "bcd");
        write(dir.path(), "c.txt", "c");

        let v_seen: Vec<(String, String)> = DirReader::new(dir.path())
            .map(|res| {
                let (path, s_text) = res.unwrap();
                let s_rel = path.strip_prefix(dir.path()).unwrap();
                (s_rel.to_string_lossy().replace('\\', "/"), s_text)
            })
            .collect();

        assert_eq!(
            v_seen,
            vec![
                ("a.txt".to_string(), "a".to_string()),
                ("b/c/d.txt".to_string(), "bcd".to_string()),
                ("b/z.txt".to_string(), "bz".to_string()),
                ("c.txt".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn dir_reader_reports_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = DirReader::new(dir.path().join("absent"));
        assert!(matches!(reader.next(), Some(Err(LlmError::Io(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn windows_advance_by_half_context_and_pad_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        // Tokens: a b c a b + </eot> = [4,5,6,4,5,2]
        write(dir.path(), "one.txt", "a b c a b");
        let tok = tokenizer();
        let dataset = Dataset::new(dir.path(), 4).unwrap();

        let v_examples: Vec<(usize, TrainingExample)> = dataset
            .examples(&tok)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        let v_inputs: Vec<Vec<usize>> = v_examples.iter().map(|(_, e)| e.v_input.clone()).collect();
        assert_eq!(v_inputs, vec![vec![4, 5, 6, 4], vec![6, 4, 5, 2]]);
        assert_eq!(v_examples[0].0, 1);
        assert_eq!(v_examples[1].0, 2);

        // Second window is padded: targets are 4 5 2 </pad>.
        let a_target = &v_examples[1].1.a_target;
        assert_eq!(a_target.dim(), (4, 7));
        assert_eq!(math::argmax_rows(a_target), vec![4, 5, 2, 3]);
    }

    #[test]
    fn short_file_yields_single_padded_window() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "short.txt", "a");
        write(dir.path(), "empty.txt", "");
        let tok = tokenizer();
        let dataset = Dataset::new(dir.path(), 3).unwrap();

        let v_examples: Vec<_> = dataset
            .examples(&tok)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(v_examples.len(), 1);
        assert_eq!(v_examples[0].1.v_input, vec![4, 2, 3]);
        assert_eq!(math::argmax_rows(&v_examples[0].1.a_target), vec![2, 3, 3]);
    }

    #[test]
    fn examples_restart_from_the_beginning() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x.txt", "a b c");
        write(dir.path(), "y.txt", "c b a");
        let tok = tokenizer();
        let dataset = Dataset::new(dir.path(), 2).unwrap();

        let v_first: Vec<Vec<usize>> = dataset
            .examples(&tok)
            .unwrap()
            .map(|r| r.unwrap().1.v_input)
            .collect();
        let v_second: Vec<Vec<usize>> = dataset
            .examples(&tok)
            .unwrap()
            .map(|r| r.unwrap().1.v_input)
            .collect();
        assert!(!v_first.is_empty());
        assert_eq!(v_first, v_second);
    }

    #[test]
    fn examples_require_training_tokens() {
        let v_tokens = [S_EOW, S_UNK].iter().map(|s| s.to_string()).collect();
        let tok = BpeTokenizer::from_tokens(v_tokens, SpecialTokens::default()).unwrap();
        let dataset = Dataset::new(".", 4).unwrap();
        assert!(matches!(dataset.examples(&tok), Err(LlmError::MissingToken(_))));
    }
}
