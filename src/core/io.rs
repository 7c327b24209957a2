//! Storage handlers: the medium an image directory lives on
//!
//! The engine only ever talks to a [`StorageHandler`]; paths are `/`-separated
//! keys relative to the handler root so the same image layout works on a local
//! disk or an object store. A missing file must surface as
//! [`std::io::ErrorKind::NotFound`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Options for [`StorageHandler::output_file`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Fail with `AlreadyExists` instead of replacing an existing file
    pub exclusive: bool,
}

#[async_trait]
pub trait StorageHandler: Send + Sync {
    /// Create a directory and any missing parents
    async fn mkdir(&self, path: &str) -> io::Result<()>;

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Create or replace `path` atomically, creating parent directories as needed
    async fn output_file(&self, path: &str, data: &[u8], opts: OutputOptions) -> io::Result<()>;

    /// Create or replace `path`; the parent directory must exist
    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()>;

    /// Remove `path`; removing a missing file succeeds
    async fn unlink(&self, path: &str) -> io::Result<()>;

    /// Copy `src` to `dest` byte for byte, creating parent directories of `dest`
    ///
    /// Honours `opts.exclusive` the same way [`output_file`](Self::output_file) does.
    async fn copy(&self, src: &str, dest: &str, opts: OutputOptions) -> io::Result<()>;
}

/// Handler rooted at a directory on local disk
pub struct LocalHandler {
    root: PathBuf,
}

impl LocalHandler {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        LocalHandler {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    async fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Unique scratch name next to `target`, so concurrent writers never share one
    fn temp_sibling(target: &Path) -> PathBuf {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        target.with_file_name(name)
    }

    async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
        let mut f = fs::File::create(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        f.sync_all().await
    }

    /// Move a fully written scratch file into place; readers never observe a torn chunk
    ///
    /// Exclusive publishing hard-links, which fails atomically with `AlreadyExists`.
    /// The scratch file is gone afterwards whatever the outcome.
    async fn publish(tmp: &Path, target: &Path, opts: OutputOptions) -> io::Result<()> {
        if opts.exclusive {
            let linked = fs::hard_link(tmp, target).await;
            let removed = fs::remove_file(tmp).await;
            linked?;
            return removed;
        }
        let renamed = fs::rename(tmp, target).await;
        if renamed.is_err() {
            let _ = fs::remove_file(tmp).await;
        }
        renamed
    }
}

#[async_trait]
impl StorageHandler for LocalHandler {
    async fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.path_for(path)).await
    }

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(path)).await
    }

    async fn output_file(&self, path: &str, data: &[u8], opts: OutputOptions) -> io::Result<()> {
        let target = self.path_for(path);
        Self::ensure_parent(&target).await?;
        let tmp = Self::temp_sibling(&target);
        if let Err(e) = Self::write_synced(&tmp, data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Self::publish(&tmp, &target, opts).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()> {
        fs::write(self.path_for(path), data).await
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(path)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    async fn copy(&self, src: &str, dest: &str, opts: OutputOptions) -> io::Result<()> {
        let target = self.path_for(dest);
        Self::ensure_parent(&target).await?;
        let tmp = Self::temp_sibling(&target);
        if let Err(e) = fs::copy(self.path_for(src), &tmp).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Self::publish(&tmp, &target, opts).await
    }
}

/// In-process handler keeping every file in memory
#[derive(Default)]
pub struct MemoryHandler {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    /// Sorted list of stored file paths
    pub fn paths(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().contains_key(&Self::key(path))
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
}

fn already_exists(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::AlreadyExists, format!("file exists: {}", path))
}

#[async_trait]
impl StorageHandler for MemoryHandler {
    async fn mkdir(&self, _path: &str) -> io::Result<()> {
        // Directories are implicit in the key space
        Ok(())
    }

    async fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(&Self::key(path))
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn output_file(&self, path: &str, data: &[u8], opts: OutputOptions) -> io::Result<()> {
        let mut files = self.files.lock();
        let key = Self::key(path);
        if opts.exclusive && files.contains_key(&key) {
            return Err(already_exists(path));
        }
        files.insert(key, data.to_vec());
        Ok(())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> io::Result<()> {
        self.files.lock().insert(Self::key(path), data.to_vec());
        Ok(())
    }

    async fn unlink(&self, path: &str) -> io::Result<()> {
        self.files.lock().remove(&Self::key(path));
        Ok(())
    }

    async fn copy(&self, src: &str, dest: &str, opts: OutputOptions) -> io::Result<()> {
        let mut files = self.files.lock();
        let data = files.get(&Self::key(src)).cloned().ok_or_else(|| not_found(src))?;
        let key = Self::key(dest);
        if opts.exclusive && files.contains_key(&key) {
            return Err(already_exists(dest));
        }
        files.insert(key, data);
        Ok(())
    }
}
