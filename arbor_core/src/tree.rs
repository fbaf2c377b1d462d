//! Directory tree and directory metadata objects.

use crate::checksum::Checksum;
use crate::error::Result;
use crate::file::Xattrs;
use crate::wire::{WireReader, WireWriter};

/// A file entry in a directory tree.
///
/// The checksum is kept as decoded bytes; its size is checked by structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub checksum: Vec<u8>,
}

impl FileEntry {
    /// The file object's checksum, if correctly sized.
    pub fn checksum(&self) -> Result<Checksum> {
        Checksum::from_slice(&self.checksum)
    }
}

/// A subdirectory entry: its tree and its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub tree: Vec<u8>,
    pub meta: Vec<u8>,
}

impl DirEntry {
    pub fn tree_checksum(&self) -> Result<Checksum> {
        Checksum::from_slice(&self.tree)
    }

    pub fn meta_checksum(&self) -> Result<Checksum> {
        Checksum::from_slice(&self.meta)
    }
}

/// A directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirTree {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirEntry>,
}

impl DirTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: impl Into<String>, checksum: Checksum) {
        self.files.push(FileEntry {
            name: name.into(),
            checksum: checksum.as_bytes().to_vec(),
        });
    }

    pub fn add_dir(&mut self, name: impl Into<String>, tree: Checksum, meta: Checksum) {
        self.dirs.push(DirEntry {
            name: name.into(),
            tree: tree.as_bytes().to_vec(),
            meta: meta.as_bytes().to_vec(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Encode the tree. Entries are sorted by name (bytewise) for canonical ordering.
    pub fn encode(&self) -> Vec<u8> {
        let mut files: Vec<&FileEntry> = self.files.iter().collect();
        files.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        let mut dirs: Vec<&DirEntry> = self.dirs.iter().collect();
        dirs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        let mut w = WireWriter::new();
        w.put_len(files.len());
        for file in files {
            w.put_str(&file.name);
            w.put_bytes(&file.checksum);
        }
        w.put_len(dirs.len());
        for dir in dirs {
            w.put_str(&dir.name);
            w.put_bytes(&dir.tree);
            w.put_bytes(&dir.meta);
        }
        w.finish()
    }

    /// Decode a tree exactly as stored. Ordering is not checked here.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(data);

        let n_files = r.count("file entry", 8)?;
        let mut files = Vec::with_capacity(n_files);
        for _ in 0..n_files {
            let name = r.string("file name")?;
            let checksum = r.bytes("file checksum")?.to_vec();
            files.push(FileEntry { name, checksum });
        }

        let n_dirs = r.count("dir entry", 12)?;
        let mut dirs = Vec::with_capacity(n_dirs);
        for _ in 0..n_dirs {
            let name = r.string("dir name")?;
            let tree = r.bytes("dir tree checksum")?.to_vec();
            let meta = r.bytes("dir meta checksum")?.to_vec();
            dirs.push(DirEntry { name, tree, meta });
        }

        r.finish("dirtree")?;
        Ok(Self { files, dirs })
    }
}

/// Directory attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirMeta {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub xattrs: Xattrs,
}

impl DirMeta {
    /// A directory owned by root with the given mode.
    pub fn new(mode: u32) -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode,
            xattrs: Xattrs::new(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_u32(self.uid);
        w.put_u32(self.gid);
        w.put_u32(self.mode);
        self.xattrs.encode_into(&mut w);
        w.finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(data);
        let uid = r.u32("uid")?;
        let gid = r.u32("gid")?;
        let mode = r.u32("mode")?;
        let xattrs = Xattrs::decode_from(&mut r)?;
        r.finish("dirmeta")?;
        Ok(Self {
            uid,
            gid,
            mode,
            xattrs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Algorithm;
    use crate::file::modes;

    fn checksum(data: &[u8]) -> Checksum {
        Checksum::compute(Algorithm::Blake3, data)
    }

    #[test]
    fn test_encode_sorts_entries() {
        let mut tree = DirTree::new();
        tree.add_file("b.txt", checksum(b"b"));
        tree.add_file("a.txt", checksum(b"a"));
        tree.add_dir("zz", checksum(b"t"), checksum(b"m"));
        tree.add_dir("sub", checksum(b"t"), checksum(b"m"));

        let decoded = DirTree::decode(&tree.encode()).unwrap();
        assert_eq!(decoded.files[0].name, "a.txt");
        assert_eq!(decoded.files[1].name, "b.txt");
        assert_eq!(decoded.dirs[0].name, "sub");
        assert_eq!(decoded.dirs[1].name, "zz");
        assert_eq!(decoded.files[0].checksum().unwrap(), checksum(b"a"));
    }

    #[test]
    fn test_empty_tree() {
        let encoded = DirTree::new().encode();
        assert_eq!(encoded.len(), 8);
        assert!(DirTree::decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_decode_keeps_short_checksum_for_validation() {
        let mut tree = DirTree::new();
        tree.files.push(FileEntry {
            name: "f".to_string(),
            checksum: vec![1, 2, 3],
        });
        let decoded = DirTree::decode(&tree.encode()).unwrap();
        assert_eq!(decoded.files[0].checksum, vec![1, 2, 3]);
        assert!(decoded.files[0].checksum().is_err());
    }

    #[test]
    fn test_dirmeta_decodes_fields() {
        let mut meta = DirMeta::new(modes::DIRECTORY);
        meta.uid = 42;
        meta.xattrs.insert("security.selinux", "system_u");
        assert_eq!(DirMeta::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn test_dirmeta_trailing_bytes_rejected() {
        let mut encoded = DirMeta::new(modes::DIRECTORY).encode();
        encoded.push(0);
        assert!(DirMeta::decode(&encoded).is_err());
    }

    use proptest::prelude::*;

    fn arb_name() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9._-]{1,32}"
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            max_shrink_iters: 10000,
            ..ProptestConfig::default()
        })]

        /// Tree encoding is independent of insertion order
        #[test]
        fn prop_encoding_order_independent(
            names in prop::collection::btree_set(arb_name(), 1..20),
        ) {
            let mut forward = DirTree::new();
            for name in &names {
                forward.add_file(name.clone(), checksum(name.as_bytes()));
            }
            let mut reverse = DirTree::new();
            for name in names.iter().rev() {
                reverse.add_file(name.clone(), checksum(name.as_bytes()));
            }
            prop_assert_eq!(forward.encode(), reverse.encode());
        }
    }
}
