//! File-backed block store.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::BlockStore;
use crate::StorageError;

/// Width of the persisted offset in the sidecar file.
const OFFSET_BYTES: usize = 4;

/// A [`BlockStore`] that appends blocks to a data file.
///
/// The write offset lives in a sidecar file next to the data file
/// (`<data>.offset`, 4 bytes little-endian), replaced atomically on every
/// persist. On mount the data file is truncated back to the persisted
/// offset, dropping blocks written after the last persist. All file I/O runs
/// in the blocking thread pool.
///
/// # Example
///
/// ```no_run
/// use pendant_audio::FileBlockStore;
///
/// let store = FileBlockStore::new("recording.bin").with_capacity(64 * 1024 * 1024);
/// // Hand to PipelineBuilder::storage()...
/// ```
pub struct FileBlockStore {
    name: String,
    path: Arc<PathBuf>,
    offset_path: Arc<PathBuf>,
    capacity: Option<u64>,
    len: Arc<AtomicU64>,
    state: Arc<Mutex<FileState>>,
}

struct FileState {
    file: Option<File>,
    mounted_offset: u32,
}

impl FileBlockStore {
    /// Creates a store over `path`. Nothing is opened until mount.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut offset_path = path.clone().into_os_string();
        offset_path.push(".offset");
        Self {
            name: format!("file:{}", path.display()),
            path: Arc::new(path),
            offset_path: Arc::new(PathBuf::from(offset_path)),
            capacity: None,
            len: Arc::new(AtomicU64::new(0)),
            state: Arc::new(Mutex::new(FileState {
                file: None,
                mounted_offset: 0,
            })),
        }
    }

    /// Limits the data file to `bytes`.
    #[must_use]
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the offset sidecar.
    pub fn offset_path(&self) -> &Path {
        &self.offset_path
    }

    fn read_offset_file(path: &Path) -> Result<Option<u32>, StorageError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let raw: [u8; OFFSET_BYTES] = bytes
                    .get(..OFFSET_BYTES)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| {
                        StorageError::custom(format!("{}: truncated offset file", path.display()))
                    })?;
                Ok(Some(u32::from_le_bytes(raw)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn mount_blocking(
        state: &mut FileState,
        path: &Path,
        offset_path: &Path,
    ) -> Result<u64, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| StorageError::io(path, e))?
            .len();

        let persisted = Self::read_offset_file(offset_path)?;
        let offset = match persisted {
            Some(offset) => u64::from(offset).min(file_len),
            None => file_len.min(u64::from(u32::MAX)),
        };
        if offset < file_len {
            tracing::warn!(
                path = %path.display(),
                file_len,
                offset,
                "discarding blocks written after the last persisted offset"
            );
            file.set_len(offset).map_err(|e| StorageError::io(path, e))?;
        }
        file.seek(SeekFrom::End(0))
            .map_err(|e| StorageError::io(path, e))?;

        state.file = Some(file);
        state.mounted_offset = offset as u32;
        Ok(offset)
    }

    fn persist_blocking(offset_path: &Path, offset: u32) -> Result<(), StorageError> {
        let mut tmp = offset_path.to_path_buf().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(&offset.to_le_bytes())
            .map_err(|e| StorageError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StorageError::io(&tmp, e))?;
        std::fs::rename(&tmp, offset_path).map_err(|e| StorageError::io(offset_path, e))
    }
}

#[async_trait]
impl BlockStore for FileBlockStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mount(&self) -> Result<(), StorageError> {
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);
        let offset_path = Arc::clone(&self.offset_path);

        let len = tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::mount_blocking(&mut state, &path, &offset_path)
        })
        .await
        .map_err(|e| StorageError::custom(format!("mount task panicked: {e}")))??;

        self.len.store(len, Ordering::SeqCst);
        Ok(())
    }

    async fn append_block(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let block = bytes.to_vec();
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            let file = state.file.as_mut().ok_or(StorageError::NotReady)?;
            file.write_all(&block)
                .map_err(|e| StorageError::io(&*path, e))
        })
        .await
        .map_err(|e| StorageError::custom(format!("write task panicked: {e}")))??;

        self.len.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn read_offset(&self) -> Result<u32, StorageError> {
        let state = self.state.lock().await;
        if state.file.is_none() {
            return Err(StorageError::NotReady);
        }
        Ok(state.mounted_offset)
    }

    async fn persist_offset(&self, offset: u32) -> Result<(), StorageError> {
        let offset_path = Arc::clone(&self.offset_path);
        tokio::task::spawn_blocking(move || Self::persist_blocking(&offset_path, offset))
            .await
            .map_err(|e| StorageError::custom(format!("persist task panicked: {e}")))?
    }

    fn capacity_remaining(&self) -> u32 {
        let used = self.len.load(Ordering::SeqCst);
        match self.capacity {
            Some(capacity) => u32::try_from(capacity.saturating_sub(used)).unwrap_or(u32::MAX),
            None => u32::MAX,
        }
    }
}
