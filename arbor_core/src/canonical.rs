//! Canonical forms and the checksums computed over them.
//!
//! Metadata objects hash as `u32 type tag || payload`; the tag keeps a commit and a
//! dirtree with identical payload bytes from sharing a checksum. File objects hash as
//! `u32 header_len || file header || content`, streamed so content of any size is
//! hashed in bounded memory.

use crate::checksum::{Algorithm, Checksum, Hasher};
use crate::error::{Error, Result};
use crate::file::{FileInfo, Xattrs, encode_file_header};
use crate::object::ObjectType;
use std::io::{self, Read};

/// What gets hashed for an object.
pub enum ObjectPayload<'a> {
    /// Serialized commit, dirtree or dirmeta.
    Metadata(&'a [u8]),
    /// A file: its metadata plus a content stream.
    File {
        info: &'a FileInfo,
        xattrs: &'a Xattrs,
        content: &'a mut dyn Read,
    },
}

/// Compute the checksum of an object from its type and payload.
///
/// `RawFile` and `ArchivedFileMeta` both hash as `RawFile`. I/O errors from the
/// content stream propagate; the stream is never silently cut short.
pub fn canonical_checksum(
    algorithm: Algorithm,
    objtype: ObjectType,
    payload: ObjectPayload<'_>,
) -> Result<Checksum> {
    let checksum_type = objtype.checksum_type().ok_or_else(|| {
        Error::invalid_object_type("an independently checksummed type", objtype.as_str())
    })?;

    match (checksum_type, payload) {
        (
            ObjectType::Commit | ObjectType::DirTree | ObjectType::DirMeta,
            ObjectPayload::Metadata(bytes),
        ) => Ok(checksum_metadata(algorithm, checksum_type, bytes)),
        (
            ObjectType::RawFile,
            ObjectPayload::File {
                info,
                xattrs,
                content,
            },
        ) => checksum_file(algorithm, info, xattrs, content),
        (
            ObjectType::Commit | ObjectType::DirTree | ObjectType::DirMeta,
            ObjectPayload::File { .. },
        ) => Err(Error::invalid_object_type("file", objtype.as_str())),
        (ObjectType::RawFile, ObjectPayload::Metadata(_)) => {
            Err(Error::invalid_object_type("metadata", objtype.as_str()))
        }
        (ObjectType::ArchivedFileMeta | ObjectType::ArchivedFileContent, _) => Err(
            Error::invalid_object_type("a normalized checksum type", objtype.as_str()),
        ),
    }
}

/// Checksum of a metadata payload (commit, dirtree or dirmeta).
pub fn checksum_metadata(algorithm: Algorithm, objtype: ObjectType, payload: &[u8]) -> Checksum {
    let mut hasher = algorithm.hasher();
    hasher.update(&u32::from(objtype.to_u8()).to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// The header that precedes file content in the canonical form.
pub fn file_canonical_header(info: &FileInfo, xattrs: &Xattrs) -> Vec<u8> {
    let header = encode_file_header(info, xattrs);
    let mut buf = Vec::with_capacity(4 + header.len());
    buf.extend_from_slice(&(header.len() as u32).to_be_bytes());
    buf.extend_from_slice(&header);
    buf
}

/// Checksum of a file object, streaming its content.
pub fn checksum_file<R: Read + ?Sized>(
    algorithm: Algorithm,
    info: &FileInfo,
    xattrs: &Xattrs,
    content: &mut R,
) -> Result<Checksum> {
    let mut hasher: Hasher = algorithm.hasher();
    hasher.update(&file_canonical_header(info, xattrs));
    io::copy(content, &mut hasher)?;
    Ok(hasher.finalize())
}
