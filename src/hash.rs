//! Object ids as they travel through the transport layer.
//!
//! Ref advertisements, fetch wants and push commands all carry object ids as hexadecimal
//! strings. The transport core never hashes content itself; it only parses, compares and
//! prints ids, and needs to know the zero id of the object format in use so that creations
//! and deletions can be expressed in ref updates.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// The [`HashKind`] enum represents the object formats a remote may advertise
/// (`object-format=sha1` or `object-format=sha256`).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize,
)]
pub enum HashKind {
    #[default]
    Sha1,
    Sha256,
}

impl HashKind {
    pub const fn hex_len(&self) -> usize {
        match self {
            HashKind::Sha1 => 40,
            HashKind::Sha256 => 64,
        }
    }
    pub const fn as_str(&self) -> &'static str {
        match self {
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HashKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashKind::Sha1),
            "sha256" => Ok(HashKind::Sha256),
            _ => Err("Invalid hash kind".to_string()),
        }
    }
}

/// A Git object id, either a 20-byte SHA-1 or a 32-byte SHA-256 value.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize,
)]
pub enum ObjectHash {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash::Sha1([0u8; 20])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.as_ref()))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        match self {
            ObjectHash::Sha1(bytes) => bytes.as_slice(),
            ObjectHash::Sha256(bytes) => bytes.as_slice(),
        }
    }
}

/// Parses a 40 (SHA-1) or 64 (SHA-256) character hexadecimal string.
/// The object format is inferred from the length.
impl FromStr for ObjectHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = [HashKind::Sha1, HashKind::Sha256]
            .into_iter()
            .find(|kind| kind.hex_len() == s.len())
            .ok_or_else(|| "Invalid hash length".to_string())?;
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        let mut id = ObjectHash::zero(kind);
        match &mut id {
            ObjectHash::Sha1(h) => h.copy_from_slice(&bytes),
            ObjectHash::Sha256(h) => h.copy_from_slice(&bytes),
        }
        Ok(id)
    }
}

impl ObjectHash {
    /// The all-zero id, used as the "absent" side of ref creations and deletions.
    pub fn zero(kind: HashKind) -> ObjectHash {
        match kind {
            HashKind::Sha1 => ObjectHash::Sha1([0u8; 20]),
            HashKind::Sha256 => ObjectHash::Sha256([0u8; 32]),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_ref().iter().all(|b| *b == 0)
    }

    /// returns the kind of hash
    pub fn kind(&self) -> HashKind {
        match self {
            ObjectHash::Sha1(_) => HashKind::Sha1,
            ObjectHash::Sha256(_) => HashKind::Sha256,
        }
    }

    /// Abbreviated hex form used in human-readable push summaries.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(7);
        s
    }
}
