use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::codec::ByteOrder;
use crate::error::{Error, Result};
use crate::options::{Options, SyncPolicy};
use crate::root_index::RootIndexRecord;
use crate::storage::Storage;
use crate::types::{INITIAL_VERSION, Version};

/// Name of the append-only data file inside the storage directory.
pub const DATA_FILE: &str = "pages.dat";

/// Name of the commit metadata file inside the storage directory.
pub const META_FILE: &str = "META";

const META_SIZE: usize = 8 + 8 + 4;

/// Durable storage: one append-only data file plus a small META file.
///
/// ```text
/// <dir>/pages.dat   node pages and root records, back to back
/// <dir>/META        ┌────────────┬─────────────┬──────────┐
///                   │ offset (8B)│ version (8B)│ CRC (4B) │
///                   └────────────┴─────────────┴──────────┘
/// ```
///
/// META is the commit barrier. It is replaced atomically (write a temp file,
/// fsync, rename), so after a crash it names either the previous or the new
/// commit, never a torn one. Bytes in `pages.dat` past the record META points
/// at belong to a commit that never finished and are cut off on open.
///
/// Two layers of buffering, as with any file writer:
///   BufWriter.flush()  → Rust buffer → OS page cache   (every append)
///   file.sync_all()    → OS page cache → physical disk (per SyncPolicy, and on flush)
pub struct FileStorage {
    dir: PathBuf,
    page_size: usize,
    byte_order: ByteOrder,
    sync_policy: SyncPolicy,
    inner: Mutex<Inner>,
}

struct Inner {
    writer: Option<BufWriter<File>>,
    reader: Option<File>,
    cursor: u64,
    last_persisted: Option<u64>,
    version: Version,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl FileStorage {
    /// Open (or create) the storage in `dir`.
    ///
    /// `options` must match the ones the directory was created with; page
    /// size and byte order are not recorded on disk.
    pub fn open(dir: &Path, options: &Options) -> Result<Self> {
        options.validate()?;
        fs::create_dir_all(dir)?;

        let data_path = dir.join(DATA_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data_path)?;
        let mut cursor = file.metadata()?.len();

        let (last_persisted, version) = match read_meta(&dir.join(META_FILE), options.byte_order)? {
            Some((offset, version)) => (Some(offset), version),
            None => (None, INITIAL_VERSION),
        };

        // The committed log ends with the record META names.
        let committed_end = last_persisted.map_or(0, |offset| offset + RootIndexRecord::SIZE as u64);
        if committed_end > cursor {
            return Err(Error::Corruption(format!(
                "META points at record ending at {committed_end} past end of data ({cursor} bytes)"
            )));
        }
        if cursor > committed_end {
            warn!(
                bytes = cursor - committed_end,
                "truncating uncommitted tail of data file"
            );
            file.set_len(committed_end)?;
            cursor = committed_end;
        }
        let reader = File::open(&data_path)?;

        info!(
            dir = %dir.display(),
            bytes = cursor,
            version,
            "opened file storage"
        );

        Ok(FileStorage {
            dir: dir.to_path_buf(),
            page_size: options.page_size,
            byte_order: options.byte_order,
            sync_policy: options.sync_policy,
            inner: Mutex::new(Inner {
                writer: Some(BufWriter::new(file)),
                reader: Some(reader),
                cursor,
                last_persisted,
                version,
                writes_since_sync: 0,
                last_sync: Instant::now(),
            }),
        })
    }

    /// Directory holding the data and META files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_meta(&self, offset: u64, version: Version) -> Result<()> {
        let mut buf = Vec::with_capacity(META_SIZE);
        self.byte_order.put_u64(&mut buf, offset);
        self.byte_order.put_u64(&mut buf, version);
        let crc = crc32fast::hash(&buf);
        self.byte_order.put_u32(&mut buf, crc);

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(META_FILE)).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Inner {
    fn sync(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::Closed)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    fn sync_per_policy(&mut self, policy: SyncPolicy) -> Result<()> {
        match policy {
            SyncPolicy::EveryWrite => self.sync(),
            SyncPolicy::EveryNWrites(n) if self.writes_since_sync >= n => self.sync(),
            SyncPolicy::EveryNMillis(ms) if self.last_sync.elapsed().as_millis() >= ms as u128 => {
                self.sync()
            }
            _ => Ok(()),
        }
    }

    /// Cut the file and the cursor back to `offset` after a failed append so
    /// the next append lands where the cursor says it will.
    fn discard_partial_append(&mut self, offset: u64) {
        self.cursor = offset;
        let Some(writer) = self.writer.take() else {
            return;
        };
        let (file, _) = writer.into_parts();
        if let Err(e) = file.set_len(offset) {
            warn!(offset, error = %e, "failed to truncate partial append");
        }
        self.writer = Some(BufWriter::new(file));
    }
}

impl Storage for FileStorage {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let mut inner = self.inner.lock();
        let offset = inner.cursor;

        let writer = inner.writer.as_mut().ok_or(Error::Closed)?;
        let written = writer.write_all(data).and_then(|_| writer.flush());
        if let Err(e) = written {
            inner.discard_partial_append(offset);
            return Err(e.into());
        }

        inner.cursor += data.len() as u64;
        inner.writes_since_sync += 1;
        if let Err(e) = inner.sync_per_policy(self.sync_policy) {
            inner.writes_since_sync = inner.writes_since_sync.saturating_sub(1);
            inner.discard_partial_append(offset);
            return Err(e);
        }
        Ok(offset)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut inner = self.inner.lock();
        let end = offset.checked_add(len as u64).ok_or(Error::Eof)?;
        if end > inner.cursor {
            return Err(Error::Eof);
        }

        let reader = inner.reader.as_mut().ok_or(Error::Closed)?;
        let mut buf = BytesMut::zeroed(len);
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut buf)?;
        Ok(buf.freeze())
    }

    fn end_offset(&self) -> u64 {
        self.inner.lock().cursor
    }

    fn flush(&self) -> Result<()> {
        self.inner.lock().sync()
    }

    fn commit_metadata(&self, offset: u64, version: Version) -> Result<()> {
        let mut inner = self.inner.lock();
        // Everything META will point at must be on disk first.
        inner.sync()?;
        self.write_meta(offset, version)?;
        inner.last_persisted = Some(offset);
        inner.version = version;
        debug!(offset, version, "commit metadata written");
        Ok(())
    }

    fn last_persisted_offset(&self) -> Option<u64> {
        self.inner.lock().last_persisted
    }

    fn append_version(&self) -> Version {
        self.inner.lock().version
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_some() {
            inner.sync()?;
        }
        inner.writer = None;
        inner.reader = None;
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.writer.is_some() {
            if let Err(e) = inner.sync() {
                warn!(dir = %self.dir.display(), error = %e, "flush on drop failed");
            }
        }
    }
}

/// Read META. `None` if it does not exist yet.
fn read_meta(path: &Path, order: ByteOrder) -> Result<Option<(u64, Version)>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if data.len() != META_SIZE {
        return Err(Error::Corruption(format!(
            "META is {} bytes, expected {META_SIZE}",
            data.len()
        )));
    }

    let stored_crc = order.read_u32(&data[16..20])?;
    if crc32fast::hash(&data[..16]) != stored_crc {
        return Err(Error::Corruption("META CRC mismatch".into()));
    }

    let offset = order.read_u64(&data[0..8])?;
    let version = order.read_u64(&data[8..16])?;
    Ok(Some((offset, version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn meta_roundtrip() {
        let dir = tempdir().unwrap();
        let opts = Options::new().with_byte_order(ByteOrder::BigEndian);
        let storage = FileStorage::open(dir.path(), &opts).unwrap();
        storage.append(&[7u8; 64]).unwrap();
        storage.commit_metadata(40, 3).unwrap();

        let meta = read_meta(&dir.path().join(META_FILE), ByteOrder::BigEndian).unwrap();
        assert_eq!(meta, Some((40, 3)));
    }

    #[test]
    fn discarded_append_rewinds_file_and_cursor() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path(), &Options::default()).unwrap();
        assert_eq!(storage.append(&[1u8; 64]).unwrap(), 0);
        assert_eq!(storage.append(&[2u8; 32]).unwrap(), 64);

        storage.inner.lock().discard_partial_append(64);
        assert_eq!(storage.end_offset(), 64);
        assert_eq!(fs::metadata(dir.path().join(DATA_FILE)).unwrap().len(), 64);
        assert!(matches!(storage.read(64, 1), Err(Error::Eof)));

        // The next append reuses the discarded range.
        assert_eq!(storage.append(&[3u8; 16]).unwrap(), 64);
        assert_eq!(storage.end_offset(), 80);
        assert_eq!(&storage.read(64, 16).unwrap()[..], &[3u8; 16]);
        assert_eq!(&storage.read(0, 64).unwrap()[..], &[1u8; 64]);
    }

    #[test]
    fn missing_meta_is_none() {
        let dir = tempdir().unwrap();
        let meta = read_meta(&dir.path().join(META_FILE), ByteOrder::LittleEndian).unwrap();
        assert!(meta.is_none());
    }

    #[test]
    fn corrupted_meta_detected() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path(), &Options::default()).unwrap();
        storage.append(&[1u8; 64]).unwrap();
        storage.commit_metadata(8, 1).unwrap();
        drop(storage);

        let path = dir.path().join(META_FILE);
        let mut data = fs::read(&path).unwrap();
        data[0] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            FileStorage::open(dir.path(), &Options::default()),
            Err(Error::Corruption(_))
        ));
    }
}
