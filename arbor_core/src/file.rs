//! File metadata, extended attributes and the file header encoding.

use crate::error::Result;
use crate::wire::{WireReader, WireWriter};

/// POSIX mode bits.
pub mod modes {
    /// File-type mask.
    pub const S_IFMT: u32 = 0o170000;
    /// Regular file.
    pub const S_IFREG: u32 = 0o100000;
    /// Directory.
    pub const S_IFDIR: u32 = 0o040000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0o120000;
    /// Every bit a valid mode may carry (type + setuid/setgid/sticky + permissions).
    pub const VALID_BITS: u32 = 0o177777;

    /// Regular file (non-executable).
    pub const REGULAR: u32 = 0o100644;
    /// Executable file.
    pub const EXECUTABLE: u32 = 0o100755;
    /// Directory.
    pub const DIRECTORY: u32 = 0o040755;
    /// Symbolic link.
    pub const SYMLINK: u32 = 0o120777;
}

/// Extended attributes as `(name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Xattrs(pub Vec<(Vec<u8>, Vec<u8>)>);

impl Xattrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping names sorted; replaces an existing value.
    pub fn insert(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let name = name.into();
        let value = value.into();
        match self.0.binary_search_by(|(n, _)| n.as_slice().cmp(name.as_slice())) {
            Ok(pos) => self.0[pos].1 = value,
            Err(pos) => self.0.insert(pos, (name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Vec<u8>, Vec<u8>)> {
        self.0.iter()
    }

    pub(crate) fn encode_into(&self, w: &mut WireWriter) {
        w.put_len(self.0.len());
        for (name, value) in &self.0 {
            w.put_bytes(name);
            w.put_bytes(value);
        }
    }

    pub(crate) fn decode_from(r: &mut WireReader<'_>) -> Result<Self> {
        let count = r.count("xattr", 8)?;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let name = r.bytes("xattr name")?.to_vec();
            let value = r.bytes("xattr value")?.to_vec();
            pairs.push((name, value));
        }
        Ok(Xattrs(pairs))
    }
}

/// POSIX metadata of a file object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub rdev: u32,
    /// Target of a symbolic link; `None` for regular files.
    pub symlink_target: Option<String>,
}

impl FileInfo {
    /// A regular file owned by root.
    pub fn regular(mode: u32) -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode,
            rdev: 0,
            symlink_target: None,
        }
    }

    /// A symbolic link owned by root.
    pub fn symlink(target: impl Into<String>) -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: modes::SYMLINK,
            rdev: 0,
            symlink_target: Some(target.into()),
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & modes::S_IFMT == modes::S_IFLNK
    }
}

/// Encode the file header: uid, gid, mode, rdev, symlink target, xattrs.
pub fn encode_file_header(info: &FileInfo, xattrs: &Xattrs) -> Vec<u8> {
    let mut w = WireWriter::new();
    w.put_u32(info.uid);
    w.put_u32(info.gid);
    w.put_u32(info.mode);
    w.put_u32(info.rdev);
    w.put_str(info.symlink_target.as_deref().unwrap_or(""));
    xattrs.encode_into(&mut w);
    w.finish()
}

/// Decode a file header produced by [`encode_file_header`].
pub fn decode_file_header(data: &[u8]) -> Result<(FileInfo, Xattrs)> {
    let mut r = WireReader::new(data);
    let uid = r.u32("uid")?;
    let gid = r.u32("gid")?;
    let mode = r.u32("mode")?;
    let rdev = r.u32("rdev")?;
    let target = r.string("symlink target")?;
    let xattrs = Xattrs::decode_from(&mut r)?;
    r.finish("file header")?;

    let info = FileInfo {
        uid,
        gid,
        mode,
        rdev,
        symlink_target: if target.is_empty() { None } else { Some(target) },
    };
    Ok((info, xattrs))
}
