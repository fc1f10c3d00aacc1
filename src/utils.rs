// utils.rs
// Description: Persistence helpers: atomic file writes and versioned bincode blobs.
// History:
// - 2026-10-18: Replace text checkpoints with tagged binary blobs.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};

/// Envelope written in front of every persisted payload.
#[derive(Serialize, Deserialize)]
struct Blob<T> {
    s_magic: String,
    i_version: u32,
    payload: T,
}

#[derive(Deserialize)]
struct BlobHeader {
    s_magic: String,
    i_version: u32,
}

/// Encodes `payload` behind a magic tag and version number.
pub fn encode_blob<T: Serialize>(s_magic: &str, i_version: u32, payload: &T) -> Result<Vec<u8>> {
    let blob = Blob {
        s_magic: s_magic.to_string(),
        i_version,
        payload,
    };
    bincode::serde::encode_to_vec(&blob, bincode::config::standard())
        .map_err(|e| LlmError::MalformedState(format!("encode {s_magic}: {e}")))
}

/// Decodes a blob written by [`encode_blob`], checking tag, version and trailing bytes.
pub fn decode_blob<T: DeserializeOwned>(s_magic: &str, i_version: u32, v_bytes: &[u8]) -> Result<T> {
    let config = bincode::config::standard();

    // Header first so a foreign file reports its tag rather than a payload error.
    let (header, _): (BlobHeader, usize) = bincode::serde::decode_from_slice(v_bytes, config)
        .map_err(|e| LlmError::MalformedState(format!("header: {e}")))?;
    if header.s_magic != s_magic {
        return Err(LlmError::MalformedState(format!(
            "expected tag {s_magic:?}, found {:?}",
            header.s_magic
        )));
    }
    if header.i_version != i_version {
        return Err(LlmError::MalformedState(format!(
            "unsupported {s_magic} version {} (expected {i_version})",
            header.i_version
        )));
    }

    let (blob, i_read): (Blob<T>, usize) = bincode::serde::decode_from_slice(v_bytes, config)
        .map_err(|e| LlmError::MalformedState(format!("{s_magic}: {e}")))?;
    if i_read != v_bytes.len() {
        return Err(LlmError::MalformedState(format!(
            "{s_magic}: {} trailing bytes",
            v_bytes.len() - i_read
        )));
    }
    Ok(blob.payload)
}

/// Writes to a sibling temp file, then renames over the target.
pub fn write_file_atomic(path: &Path, v_bytes: &[u8]) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(LlmError::InvalidParameter("empty output path".to_string()));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut s_tmp = path.as_os_str().to_owned();
    s_tmp.push(".tmp");
    let tmp_path = Path::new(&s_tmp);

    {
        let mut file = fs::File::create(tmp_path)?;
        file.write_all(v_bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}
