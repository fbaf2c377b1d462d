//! Object types, object names and the storage envelope.
//!
//! Every stored object (loose or packed) is a 16-byte header followed by the payload:
//!
//! ```text
//! 0x00  4   "ARBO" magic
//! 0x04  1   version (u8) = 1
//! 0x05  1   type: 1=file, 2=archive-content, 3=archive-meta, 4=dirtree, 5=dirmeta, 6=commit
//! 0x06  1   algo: 1=blake3-256, 2=sha256
//! 0x07  1   compression: 0=none, 1=zstd
//! 0x08  8   payload_len (u64 LE) - stored (possibly compressed) size
//! 0x10  ... payload
//! ```

use crate::checksum::{Algorithm, Checksum};
use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;

/// Magic bytes at the start of every object envelope.
pub const MAGIC: &[u8; 4] = b"ARBO";

/// Current envelope format version.
pub const VERSION: u8 = 1;

/// Size of the envelope header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Object types.
///
/// Every dispatch over object kinds matches this enum exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectType {
    /// File content plus metadata, stored as one object.
    RawFile = 1,
    /// Content half of an archived file; checked through its meta object.
    ArchivedFileContent = 2,
    /// Metadata half of an archived file.
    ArchivedFileMeta = 3,
    /// Directory listing.
    DirTree = 4,
    /// Directory attributes.
    DirMeta = 5,
    /// Commit.
    Commit = 6,
}

impl ObjectType {
    /// All object types, in tag order.
    pub const ALL: [ObjectType; 6] = [
        ObjectType::RawFile,
        ObjectType::ArchivedFileContent,
        ObjectType::ArchivedFileMeta,
        ObjectType::DirTree,
        ObjectType::DirMeta,
        ObjectType::Commit,
    ];

    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ObjectType::RawFile),
            2 => Ok(ObjectType::ArchivedFileContent),
            3 => Ok(ObjectType::ArchivedFileMeta),
            4 => Ok(ObjectType::DirTree),
            5 => Ok(ObjectType::DirMeta),
            6 => Ok(ObjectType::Commit),
            _ => Err(Error::unknown_object_type(format!("tag {}", value))),
        }
    }

    /// Get the string name of this object type (also the loose file extension).
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::RawFile => "file",
            ObjectType::ArchivedFileContent => "archive-content",
            ObjectType::ArchivedFileMeta => "archive-meta",
            ObjectType::DirTree => "dirtree",
            ObjectType::DirMeta => "dirmeta",
            ObjectType::Commit => "commit",
        }
    }

    /// Parse from the string name.
    pub fn parse(s: &str) -> Result<Self> {
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::unknown_object_type(s))
    }

    /// Whether objects of this type are decoded as metadata.
    pub fn is_metadata(self) -> bool {
        match self {
            ObjectType::Commit | ObjectType::DirTree | ObjectType::DirMeta => true,
            ObjectType::RawFile | ObjectType::ArchivedFileContent | ObjectType::ArchivedFileMeta => {
                false
            }
        }
    }

    /// The type an object is checksummed as.
    ///
    /// Archived file metadata hashes as a raw file so the checksum does not depend on
    /// the storage representation. Archived content has no checksum of its own.
    pub fn checksum_type(self) -> Option<ObjectType> {
        match self {
            ObjectType::RawFile | ObjectType::ArchivedFileMeta => Some(ObjectType::RawFile),
            ObjectType::Commit | ObjectType::DirTree | ObjectType::DirMeta => Some(self),
            ObjectType::ArchivedFileContent => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The identity of a stored object: its checksum and its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectName {
    pub checksum: Checksum,
    pub objtype: ObjectType,
}

impl ObjectName {
    pub fn new(checksum: Checksum, objtype: ObjectType) -> Self {
        Self { checksum, objtype }
    }

    /// Parse `<hex>.<type>`.
    pub fn parse(s: &str) -> Result<Self> {
        let (hex, ext) = s
            .split_once('.')
            .ok_or_else(|| Error::invalid_checksum(format!("Invalid object name: {}", s)))?;
        Ok(Self::new(Checksum::from_hex(hex)?, ObjectType::parse(ext)?))
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.checksum, self.objtype)
    }
}

/// Compression types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// No compression.
    None = 0,
    /// Zstandard compression.
    Zstd = 1,
}

impl CompressionType {
    /// Convert to byte representation.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from byte representation.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zstd),
            _ => Err(Error::compression_error(format!(
                "Invalid compression type: {}",
                value
            ))),
        }
    }
}

/// A 16-byte object envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Envelope format version.
    pub version: u8,
    /// Object type.
    pub object_type: ObjectType,
    /// Hash algorithm of the owning repository.
    pub algorithm: Algorithm,
    /// Compression applied to the payload.
    pub compression: CompressionType,
    /// Length of the stored payload in bytes.
    pub payload_len: u64,
}

impl ObjectHeader {
    /// Create a new object header.
    pub fn new(
        object_type: ObjectType,
        algorithm: Algorithm,
        compression: CompressionType,
        payload_len: u64,
    ) -> Self {
        Self {
            version: VERSION,
            object_type,
            algorithm,
            compression,
            payload_len,
        }
    }

    /// Encode the header to a 16-byte array.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version;
        buf[5] = self.object_type.to_u8();
        buf[6] = self.algorithm.id();
        buf[7] = self.compression.to_u8();
        buf[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decode a header from the first 16 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::schema(format!(
                "Envelope header too short: {} bytes (expected {})",
                buf.len(),
                HEADER_SIZE
            )));
        }

        if &buf[0..4] != MAGIC {
            return Err(Error::schema(format!(
                "Invalid magic: expected {:?}, got {:?}",
                MAGIC,
                &buf[0..4]
            )));
        }

        let version = buf[4];
        if version != VERSION {
            return Err(Error::schema(format!(
                "Unsupported envelope version: {} (expected {})",
                version, VERSION
            )));
        }

        let object_type = ObjectType::from_u8(buf[5])?;
        let algorithm = Algorithm::from_id(buf[6])?;
        let compression = CompressionType::from_u8(buf[7])?;

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&buf[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes);

        Ok(Self {
            version,
            object_type,
            algorithm,
            compression,
            payload_len,
        })
    }
}
