//! Checksums and the streaming hasher behind them.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use sha2::Digest;
use std::fmt;
use std::io::{self, Read, Write};

/// Checksum size in bytes (both supported algorithms produce 256-bit digests).
pub const CHECKSUM_SIZE: usize = 32;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// BLAKE3 with 256-bit output.
    Blake3,
    /// SHA-256.
    Sha256,
}

impl Algorithm {
    /// Returns the string representation of the algorithm (for config files).
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Blake3 => "blake3-256",
            Algorithm::Sha256 => "sha256",
        }
    }

    /// Parse algorithm from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "blake3-256" => Ok(Algorithm::Blake3),
            "sha256" => Ok(Algorithm::Sha256),
            _ => Err(Error::unsupported_algorithm(s)),
        }
    }

    /// Returns the algorithm ID byte (for object envelopes).
    pub fn id(&self) -> u8 {
        match self {
            Algorithm::Blake3 => 1,
            Algorithm::Sha256 => 2,
        }
    }

    /// Parse algorithm from ID byte.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Algorithm::Blake3),
            2 => Ok(Algorithm::Sha256),
            _ => Err(Error::unsupported_algorithm(format!("ID {}", id))),
        }
    }

    /// Start an incremental hash with this algorithm.
    pub fn hasher(self) -> Hasher {
        match self {
            Algorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            Algorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }
}

/// Incremental hasher. Feed it through `Write` (e.g. `io::copy`) and call `finalize`.
pub enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(sha2::Sha256),
}

impl Hasher {
    /// Feed bytes into the hash.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Sha256(h) => Digest::update(h, data),
        }
    }

    /// Finish hashing and return the checksum.
    pub fn finalize(self) -> Checksum {
        match self {
            Hasher::Blake3(h) => Checksum(*h.finalize().as_bytes()),
            Hasher::Sha256(h) => {
                let digest = h.finalize();
                let mut bytes = [0u8; CHECKSUM_SIZE];
                bytes.copy_from_slice(&digest);
                Checksum(bytes)
            }
        }
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A 32-byte content checksum.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum([u8; CHECKSUM_SIZE]);

impl Checksum {
    /// Create a Checksum from raw bytes.
    pub fn from_bytes(bytes: [u8; CHECKSUM_SIZE]) -> Self {
        Checksum(bytes)
    }

    /// Create a Checksum from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; CHECKSUM_SIZE] = bytes.try_into().map_err(|_| {
            Error::invalid_checksum(format!(
                "Expected {} bytes, got {}",
                CHECKSUM_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Checksum(array))
    }

    /// Create a Checksum from a hex string (64 hex characters).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != CHECKSUM_SIZE * 2 {
            return Err(Error::invalid_checksum(format!(
                "Expected {} hex characters, got {}",
                CHECKSUM_SIZE * 2,
                hex_str.len()
            )));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::invalid_checksum(format!("Invalid hex: {}", e)))?;

        Self::from_slice(&bytes)
    }

    /// Convert to hex string (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the first 2 hex characters (for directory sharding).
    pub fn prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Get the remaining 62 hex characters (for filename).
    pub fn suffix(&self) -> String {
        hex::encode(&self.0[1..])
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_SIZE] {
        &self.0
    }

    /// Hash raw bytes.
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Hash everything a reader yields, in bounded memory.
    pub fn compute_reader<R: Read>(algorithm: Algorithm, mut reader: R) -> Result<Self> {
        let mut hasher = algorithm.hasher();
        io::copy(&mut reader, &mut hasher)?;
        Ok(hasher.finalize())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
