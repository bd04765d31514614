use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use sha1::{Digest, Sha1};

use crate::error::{BrainioError, Result};

const BUF_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-1 digest as stored in the catalog `sha1` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha1Digest(String);

impl Sha1Digest {
    pub const HEX_LEN: usize = 40;

    /// Accepts 40 hex characters in either case and normalises to lowercase.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() != Self::HEX_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha1::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sha1Digest {
    type Err = BrainioError;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
            .ok_or_else(|| BrainioError::invalid(format!("`{value}` is not a 40-character sha1")))
    }
}

/// Streams `path` through SHA-1.
pub fn sha1_file(path: &Path) -> Result<Sha1Digest> {
    let file = File::open(path).map_err(|err| BrainioError::io(path, err))?;
    let mut reader = BufReader::with_capacity(BUF_SIZE, file);
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let read = reader
            .read(&mut buf)
            .map_err(|err| BrainioError::io(path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Sha1Digest(hex::encode(hasher.finalize())))
}
