//! SHA-256 content checksums

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncReadExt;

/// Read buffer for streaming file checksums (64KB)
const READ_BUFFER_SIZE: usize = 64 * 1024;

fn checksum_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[a-f0-9]{64}$").expect("checksum pattern is valid"))
}

/// Rejected checksum string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid checksum {value:?}: expected 64 lowercase hex characters")]
pub struct InvalidChecksum {
    pub value: String,
}

/// Lowercase hex SHA-256 digest of raw content
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Hash `content`. Never fails, including for empty input.
    pub fn of(content: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(content)))
    }

    /// Accept only a 64-character lowercase hex string
    pub fn parse(value: &str) -> Result<Self, InvalidChecksum> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidChecksum {
                value: value.to_string(),
            })
        }
    }

    pub fn is_valid(value: &str) -> bool {
        checksum_pattern().is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stream a file from disk through the hasher
    pub async fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Checksum {
    type Err = InvalidChecksum;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = InvalidChecksum;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidChecksum { value })
        }
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}
