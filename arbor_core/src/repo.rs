//! Filesystem repository: configuration, object I/O and packing.

use crate::canonical::{checksum_file, checksum_metadata, file_canonical_header};
use crate::checksum::{Algorithm, Checksum};
use crate::commit::Commit;
use crate::error::{Error, Result};
use crate::file::{FileInfo, Xattrs, decode_file_header, encode_file_header};
use crate::object::{CompressionType, HEADER_SIZE, ObjectHeader, ObjectName, ObjectType};
use crate::pack::{
    PackIndex, PackWriter, pack_data_path, pack_index_path, parse_pack_index_name,
};
use crate::store::{LoadedFile, ObjectStore, PackStore, RepoMode};
use crate::tree::{DirMeta, DirTree};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Compression threshold: archived content >= 4KB is compressed.
const COMPRESSION_THRESHOLD: usize = 4096;

/// A repository on the local filesystem.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    algorithm: Algorithm,
    mode: RepoMode,
}

impl Repo {
    /// Initialize a new repository at the given path.
    ///
    /// Creates the directory structure:
    /// - `objects/<algo>/` for loose objects
    /// - `packs/` for pack files
    /// - `config` file with version, algorithm and mode
    pub fn init<P: AsRef<Path>>(root: P, algorithm: Algorithm, mode: RepoMode) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("objects").join(algorithm.as_str()))?;
        fs::create_dir_all(root.join("packs"))?;

        let config_content = format!(
            "version=1\nalgo={}\nmode={}\n",
            algorithm.as_str(),
            mode.as_str()
        );
        fs::write(root.join("config"), config_content)?;

        debug!(root = %root.display(), algo = algorithm.as_str(), mode = mode.as_str(), "initialized repository");
        Ok(Self {
            root,
            algorithm,
            mode,
        })
    }

    /// Open an existing repository, validating its layout and configuration.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            return Err(Error::invalid_store(&root, "directory does not exist"));
        }

        let config_path = root.join("config");
        if !config_path.exists() {
            return Err(Error::invalid_store(&root, "config file not found"));
        }

        let config_content = fs::read_to_string(&config_path)?;
        let (algorithm, mode) = Self::parse_config(&root, &config_content)?;

        if !root.join("objects").join(algorithm.as_str()).exists() {
            return Err(Error::invalid_store(
                &root,
                "objects directory structure missing",
            ));
        }
        if !root.join("packs").exists() {
            return Err(Error::invalid_store(&root, "packs directory missing"));
        }

        Ok(Self {
            root,
            algorithm,
            mode,
        })
    }

    /// Parse the config file. `mode` defaults to bare.
    fn parse_config(root: &Path, content: &str) -> Result<(Algorithm, RepoMode)> {
        let mut version = None;
        let mut algo = None;
        let mut mode = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "version" => version = Some(value.trim()),
                    "algo" => algo = Some(value.trim()),
                    "mode" => mode = Some(value.trim()),
                    _ => {}
                }
            }
        }

        if version != Some("1") {
            return Err(Error::invalid_store(
                root,
                format!("Unsupported config version: {:?}", version),
            ));
        }

        let algo_str = algo.ok_or_else(|| Error::invalid_store(root, "Missing algo in config"))?;
        let mode = match mode {
            Some(m) => RepoMode::parse(m)?,
            None => RepoMode::Bare,
        };
        Ok((Algorithm::parse(algo_str)?, mode))
    }

    /// Get the root directory of the repository.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn mode(&self) -> RepoMode {
        self.mode
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects").join(self.algorithm.as_str())
    }

    /// Directory holding pack files.
    pub fn packs_dir(&self) -> PathBuf {
        self.root.join("packs")
    }

    /// Path of a loose object.
    ///
    /// Returns: `objects/{algorithm}/{prefix}/{suffix}.{type}`
    pub fn object_path(&self, name: &ObjectName) -> PathBuf {
        self.objects_dir()
            .join(name.checksum.prefix())
            .join(format!("{}.{}", name.checksum.suffix(), name.objtype))
    }

    /// Whether the object exists, loose or packed.
    pub fn has_object(&self, name: &ObjectName) -> Result<bool> {
        Ok(self.object_path(name).exists() || self.locate_packed(name)?.is_some())
    }

    /// Write an object atomically using tempfile.
    fn write_object_atomic(
        &self,
        name: &ObjectName,
        header: &ObjectHeader,
        payload: &[u8],
    ) -> Result<()> {
        let obj_path = self.object_path(name);
        let shard_dir = self.objects_dir().join(name.checksum.prefix());
        fs::create_dir_all(&shard_dir)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&shard_dir)?;
        temp_file.write_all(&header.encode())?;
        temp_file.write_all(payload)?;
        temp_file.flush()?;
        temp_file.persist(&obj_path)?;

        Ok(())
    }

    /// Store a payload under `name` unless the object already exists.
    fn store_object(&self, name: ObjectName, payload: &[u8], compress: bool) -> Result<()> {
        if self.has_object(&name)? {
            return Ok(());
        }

        let (final_payload, compression) = if compress && payload.len() >= COMPRESSION_THRESHOLD {
            (compress_zstd(payload)?, CompressionType::Zstd)
        } else {
            (payload.to_vec(), CompressionType::None)
        };

        let header = ObjectHeader::new(
            name.objtype,
            self.algorithm,
            compression,
            final_payload.len() as u64,
        );
        self.write_object_atomic(&name, &header, &final_payload)?;
        debug!(object = %name, bytes = payload.len(), "stored object");
        Ok(())
    }

    /// Store a serialized metadata object and return its checksum.
    pub fn write_metadata(&self, objtype: ObjectType, payload: &[u8]) -> Result<Checksum> {
        if !objtype.is_metadata() {
            return Err(Error::invalid_object_type("metadata", objtype.as_str()));
        }
        let checksum = checksum_metadata(self.algorithm, objtype, payload);
        self.store_object(ObjectName::new(checksum, objtype), payload, false)?;
        Ok(checksum)
    }

    pub fn write_commit(&self, commit: &Commit) -> Result<Checksum> {
        self.write_metadata(ObjectType::Commit, &commit.encode())
    }

    pub fn write_dirtree(&self, tree: &DirTree) -> Result<Checksum> {
        self.write_metadata(ObjectType::DirTree, &tree.encode())
    }

    pub fn write_dirmeta(&self, meta: &DirMeta) -> Result<Checksum> {
        self.write_metadata(ObjectType::DirMeta, &meta.encode())
    }

    /// Store a file in the repository's representation and return its checksum.
    pub fn write_file<R: Read>(
        &self,
        info: &FileInfo,
        xattrs: &Xattrs,
        mut reader: R,
    ) -> Result<Checksum> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        let checksum = checksum_file(self.algorithm, info, xattrs, &mut &content[..])?;

        match self.mode {
            RepoMode::Bare => {
                let mut payload = file_canonical_header(info, xattrs);
                payload.extend_from_slice(&content);
                self.store_object(ObjectName::new(checksum, ObjectType::RawFile), &payload, false)?;
            }
            RepoMode::Archive => {
                // Content first, so a visible meta object always has its content.
                self.store_object(
                    ObjectName::new(checksum, ObjectType::ArchivedFileContent),
                    &content,
                    true,
                )?;
                self.store_object(
                    ObjectName::new(checksum, ObjectType::ArchivedFileMeta),
                    &encode_file_header(info, xattrs),
                    false,
                )?;
            }
        }
        Ok(checksum)
    }

    /// Find an object in the packs: `(pack id, envelope offset)`.
    fn locate_packed(&self, name: &ObjectName) -> Result<Option<(Checksum, u64)>> {
        for id in self.list_pack_ids()? {
            let Some(index) = self.read_pack_index_lenient(&id)? else {
                continue;
            };
            if let Some(offset) = index.find(name) {
                return Ok(Some((id, offset)));
            }
        }
        Ok(None)
    }

    /// Decode a pack index, skipping (with a warning) one that does not parse.
    fn read_pack_index_lenient(&self, id: &Checksum) -> Result<Option<PackIndex>> {
        let raw = self.open_pack_index(id)?;
        match PackIndex::decode(&raw) {
            Ok(index) => Ok(Some(index)),
            Err(err) => {
                warn!(pack = %id, error = %err, "skipping unreadable pack index");
                Ok(None)
            }
        }
    }

    /// Open an object's envelope and return its header and a stream over its
    /// decompressed payload.
    fn open_object(&self, name: &ObjectName) -> Result<(ObjectHeader, Box<dyn Read + '_>)> {
        let path = self.object_path(name);
        let (header, payload) = match fs::File::open(&path) {
            Ok(file) => self.open_envelope(name, &path, BufReader::new(file))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let Some((pack, offset)) = self.locate_packed(name)? else {
                    return Err(Error::object_not_found(name.to_string()));
                };
                let data_path = pack_data_path(&self.packs_dir(), &pack);
                let mut file = fs::File::open(&data_path)?;
                file.seek(SeekFrom::Start(offset))?;
                self.open_envelope(name, &data_path, BufReader::new(file))?
            }
            Err(err) => return Err(err.into()),
        };

        let stream: Box<dyn Read + '_> = match header.compression {
            CompressionType::None => Box::new(payload),
            CompressionType::Zstd => Box::new(ZstdContent::new(payload)?),
        };
        Ok((header, stream))
    }

    fn open_envelope<R: Read>(
        &self,
        name: &ObjectName,
        path: &Path,
        mut reader: R,
    ) -> Result<(ObjectHeader, ExactReader<R>)> {
        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let header = ObjectHeader::decode(&header_buf)?;

        if header.object_type != name.objtype {
            return Err(Error::corrupted_envelope(
                path,
                format!(
                    "stored type {} does not match {}",
                    header.object_type, name.objtype
                ),
            ));
        }
        if header.algorithm != self.algorithm {
            return Err(Error::corrupted_envelope(
                path,
                format!("stored algorithm {}", header.algorithm.as_str()),
            ));
        }

        let payload_len = header.payload_len;
        Ok((header, ExactReader::new(reader, payload_len)))
    }

    /// Loose objects, found by walking the shard directories.
    fn list_loose_objects(&self) -> Result<BTreeSet<ObjectName>> {
        let mut names = BTreeSet::new();
        let objects_dir = self.objects_dir();
        if !objects_dir.exists() {
            return Ok(names);
        }

        for shard_entry in fs::read_dir(&objects_dir)? {
            let shard_path = shard_entry?.path();
            if !shard_path.is_dir() {
                continue;
            }
            let prefix = shard_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_string();

            for obj_entry in fs::read_dir(&shard_path)? {
                let obj_path = obj_entry?.path();
                if !obj_path.is_file() {
                    continue;
                }
                let file_name = obj_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                match ObjectName::parse(&format!("{}{}", prefix, file_name)) {
                    Ok(name) => {
                        names.insert(name);
                    }
                    Err(_) => debug!(path = %obj_path.display(), "ignoring stray file"),
                }
            }
        }
        Ok(names)
    }

    /// Bundle every loose object into a new pack and remove the loose copies.
    ///
    /// Returns the new pack's id, or `None` if there was nothing to pack.
    pub fn pack_objects(&self) -> Result<Option<Checksum>> {
        let loose = self.list_loose_objects()?;
        if loose.is_empty() {
            return Ok(None);
        }

        let packs_dir = self.packs_dir();
        fs::create_dir_all(&packs_dir)?;
        let mut writer = PackWriter::new(&packs_dir, self.algorithm)?;
        for name in &loose {
            let envelope = fs::read(self.object_path(name))?;
            writer.add(*name, &envelope)?;
        }
        let id = writer.finish()?;

        for name in &loose {
            fs::remove_file(self.object_path(name))?;
        }
        debug!(pack = %id, objects = loose.len(), "packed loose objects");
        Ok(Some(id))
    }
}

impl ObjectStore for Repo {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn mode(&self) -> RepoMode {
        self.mode
    }

    fn list_all_objects(&self) -> Result<BTreeSet<ObjectName>> {
        let mut names = self.list_loose_objects()?;
        for id in self.list_pack_ids()? {
            if let Some(index) = self.read_pack_index_lenient(&id)? {
                names.extend(index.entries.iter().map(|e| e.name()));
            }
        }
        Ok(names)
    }

    fn load_object(&self, name: &ObjectName) -> Result<Vec<u8>> {
        let (_, mut stream) = self.open_object(name)?;
        let mut payload = Vec::new();
        stream.read_to_end(&mut payload)?;
        Ok(payload)
    }

    fn load_file(&self, checksum: &Checksum) -> Result<LoadedFile<'_>> {
        match self.mode {
            RepoMode::Bare => {
                let name = ObjectName::new(*checksum, ObjectType::RawFile);
                let (header, mut stream) = self.open_object(&name)?;

                let mut len_buf = [0u8; 4];
                stream.read_exact(&mut len_buf)?;
                let header_len = u32::from_be_bytes(len_buf) as u64;
                if header_len + 4 > header.payload_len {
                    return Err(Error::schema(format!(
                        "File header length {} exceeds payload of {} bytes",
                        header_len, header.payload_len
                    )));
                }

                let mut file_header = vec![0u8; header_len as usize];
                stream.read_exact(&mut file_header)?;
                let (info, xattrs) = decode_file_header(&file_header)?;
                Ok(LoadedFile {
                    content: stream,
                    info,
                    xattrs,
                })
            }
            RepoMode::Archive => {
                let meta = ObjectName::new(*checksum, ObjectType::ArchivedFileMeta);
                let (info, xattrs) = decode_file_header(&self.load_object(&meta)?)?;
                let content = ObjectName::new(*checksum, ObjectType::ArchivedFileContent);
                let (_, stream) = self.open_object(&content)?;
                Ok(LoadedFile {
                    content: stream,
                    info,
                    xattrs,
                })
            }
        }
    }

    fn delete_object(&self, name: &ObjectName) -> Result<bool> {
        let mut removed = remove_if_exists(&self.object_path(name))?;
        if name.objtype == ObjectType::ArchivedFileMeta {
            let content = ObjectName::new(name.checksum, ObjectType::ArchivedFileContent);
            removed |= remove_if_exists(&self.object_path(&content))?;
        }
        Ok(removed)
    }
}

impl PackStore for Repo {
    fn list_pack_ids(&self) -> Result<BTreeSet<Checksum>> {
        let mut ids = BTreeSet::new();
        let packs_dir = self.packs_dir();
        if !packs_dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&packs_dir)? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_pack_index_name) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    fn open_pack_index(&self, id: &Checksum) -> Result<Vec<u8>> {
        Ok(fs::read(pack_index_path(&self.packs_dir(), id))?)
    }

    fn open_pack_data(&self, id: &Checksum) -> Result<Box<dyn Read + '_>> {
        let file = fs::File::open(pack_data_path(&self.packs_dir(), id))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn pack_data_size(&self, id: &Checksum) -> Result<u64> {
        Ok(fs::metadata(pack_data_path(&self.packs_dir(), id))?.len())
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Yields exactly `remaining` bytes; a source that ends early is an
/// `UnexpectedEof` error rather than a short read.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("object payload truncated: {} bytes missing", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Streaming zstd decoder over a compressed payload.
///
/// A damaged frame surfaces as `InvalidData` from `read`.
struct ZstdContent<R: Read> {
    decoder: zstd::stream::read::Decoder<'static, BufReader<R>>,
}

impl<R: Read> ZstdContent<R> {
    fn new(compressed: R) -> Result<Self> {
        let decoder = zstd::stream::read::Decoder::new(compressed)
            .map_err(|e| Error::compression_error(format!("zstd decoder setup failed: {}", e)))?;
        Ok(Self { decoder })
    }
}

impl<R: Read> Read for ZstdContent<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.decoder.read(buf).map_err(|err| match err.kind() {
            io::ErrorKind::Other => io::Error::new(
                io::ErrorKind::InvalidData,
                format!("zstd decompression failed: {}", err),
            ),
            _ => err,
        })
    }
}

/// Compress data using zstd.
fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 3) // Level 3 = fast compression
        .map_err(|e| Error::compression_error(format!("zstd compression failed: {}", e)))
}
