//! # Arbor Core
//!
//! A content-addressed repository of versioned filesystem trees, and a checker
//! that proves it is intact.
//!
//! Commits point at directory trees, trees point at subtrees and files, and every
//! object is named by the checksum of its canonical form. Objects live loose on
//! disk or bundled into packs.
//!
//! ## Features
//!
//! - Commits, dirtrees, dirmeta and file objects with bit-exact canonical encodings
//! - BLAKE3 or SHA-256 checksums, streamed in bounded memory
//! - Bare (one object per file) and archive (metadata + compressed content) modes
//! - Packs with a checksummed data blob and an offset index
//! - `fsck`: reachability traversal, structural validation, checksum verification,
//!   pack validation and optional deletion of corrupt objects
//!
//! ## Example
//!
//! ```no_run
//! use arbor_core::{Algorithm, CommitOptions, Fsck, FsckOptions, Repo, RepoMode};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize a new repository
//! let repo = Repo::init("./my-repo", Algorithm::Blake3, RepoMode::Bare)?;
//!
//! // Commit a directory
//! let options = CommitOptions {
//!     subject: "Initial import".to_string(),
//!     ..CommitOptions::default()
//! };
//! repo.commit_directory(Path::new("./my-data"), &options)?;
//!
//! // Bundle loose objects into a pack
//! repo.pack_objects()?;
//!
//! // Check everything
//! let report = Fsck::new(&repo).options(FsckOptions::default()).run()?;
//! println!("{} findings", report.findings.len());
//! # Ok(())
//! # }
//! ```

mod cancel;
mod canonical;
mod checksum;
mod commit;
mod error;
mod file;
mod fsck;
mod import;
mod object;
mod pack;
mod repo;
mod store;
mod traverse;
mod tree;
mod validate;
mod verify;
mod wire;

#[cfg(test)]
mod testutil;

pub use cancel::CancelFlag;
pub use canonical::{ObjectPayload, canonical_checksum, checksum_file, checksum_metadata};
pub use checksum::{Algorithm, CHECKSUM_SIZE, Checksum, Hasher};
pub use commit::Commit;
pub use error::{Error, Result};
pub use file::{FileInfo, Xattrs, modes};
pub use fsck::{Finding, Fsck, FsckOptions, FsckReport, Progress};
pub use import::CommitOptions;
pub use object::{CompressionType, ObjectHeader, ObjectName, ObjectType};
pub use pack::{PackCorruption, PackIndex, PackIndexEntry, verify_pack};
pub use repo::Repo;
pub use store::{LoadedFile, ObjectStore, PackStore, RepoMode};
pub use traverse::traverse_commits;
pub use tree::{DirEntry, DirMeta, DirTree, FileEntry};
pub use validate::{Metadata, validate_structure};
pub use verify::verify_object;
