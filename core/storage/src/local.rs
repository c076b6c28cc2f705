//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use std::any::Any;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use conduit_common::{Error, ObjectPath, Result, TransferOptions};

use crate::provider::{Backend, Metadata, Provider};
use crate::stream::{verify_size, StreamObject};

/// Construction options for [`LocalProvider`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    /// Directory that object paths are resolved against.
    pub root: PathBuf,
}

/// Guess a MIME type from a file name, falling back to octet-stream.
pub fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Local filesystem storage provider.
///
/// Stores objects as files under a root directory. Uploads are written to
/// a temporary sibling and renamed into place once the stream completed.
///
/// Transfer options: `path` (required).
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Root cannot be created
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert an ObjectPath to a filesystem path.
    fn to_fs_path(&self, path: &ObjectPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn object_path(options: &TransferOptions) -> Result<ObjectPath> {
        let path = options.path()?;
        if path.is_root() {
            return Err(Error::InvalidInput("Object path cannot be root".to_string()));
        }
        Ok(path)
    }

    /// Create metadata from filesystem metadata.
    fn create_metadata(
        &self,
        path: &ObjectPath,
        fs_path: &Path,
        fs_meta: std::fs::Metadata,
    ) -> Metadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        Metadata {
            id: path.to_string_path(),
            name: path.name().unwrap_or("/").to_string(),
            size: Some(fs_meta.len()),
            content_type: guess_content_type(fs_path),
            modified,
            etag: Some(format!("{}-{}", modified.timestamp(), fs_meta.len())),
            provider_data: Some(serde_json::json!({
                "fs_path": fs_path.to_string_lossy(),
            })),
        }
    }

    async fn ensure_parent(fs_path: &Path) -> Result<()> {
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io(e, parent.display()))?;
        }
        Ok(())
    }

    /// Hidden sibling that receives content before it is renamed into place.
    fn part_path(path: &ObjectPath, fs_path: &Path) -> PathBuf {
        fs_path.with_file_name(format!(
            ".{}.{}.part",
            path.name().unwrap_or("object"),
            Uuid::new_v4()
        ))
    }

    async fn stat(&self, path: &ObjectPath, fs_path: &Path) -> Result<Metadata> {
        let fs_meta = fs::metadata(fs_path)
            .await
            .map_err(|e| Error::from_io(e, path))?;
        Ok(self.create_metadata(path, fs_path, fs_meta))
    }

    fn peer<'a>(&self, dest: &'a dyn Provider) -> Result<&'a LocalProvider> {
        dest.as_any()
            .downcast_ref::<LocalProvider>()
            .ok_or_else(|| Error::Unsupported(format!("local cannot reach {}", dest.name())))
    }
}

impl Backend for LocalProvider {
    type Config = LocalConfig;

    fn from_config(config: Self::Config) -> Result<Self> {
        Self::new(config.root)
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn download(&self, options: &TransferOptions) -> Result<StreamObject> {
        let path = Self::object_path(options)?;
        let fs_path = self.to_fs_path(&path);

        let file = fs::File::open(&fs_path)
            .await
            .map_err(|e| Error::from_io(e, &path))?;
        let fs_meta = file.metadata().await.map_err(|e| Error::from_io(e, &path))?;

        if fs_meta.is_dir() {
            return Err(Error::InvalidInput(format!("Cannot download directory: {}", path)));
        }

        let content = ReaderStream::new(file)
            .map(|chunk| chunk.map_err(|e| Error::Transfer(format!("File read error: {}", e))));

        Ok(StreamObject::new(
            Box::pin(content),
            Some(fs_meta.len()),
            Some(guess_content_type(&fs_path)),
        ))
    }

    async fn upload(&self, mut obj: StreamObject, options: &TransferOptions) -> Result<Metadata> {
        let path = Self::object_path(options)?;
        let fs_path = self.to_fs_path(&path);
        Self::ensure_parent(&fs_path).await?;

        let part_path = Self::part_path(&path, &fs_path);

        let mut file = fs::File::create(&part_path)
            .await
            .map_err(|e| Error::from_io(e, &path))?;

        let mut written = 0u64;
        let result = async {
            while let Some(chunk) = obj.content.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            verify_size(obj.size, written)?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<(), Error>(())
        }
        .await;
        drop(file);

        if let Err(e) = result {
            let _ = fs::remove_file(&part_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&part_path, &fs_path).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(Error::from_io(e, &path));
        }

        debug!("Wrote {} bytes to {}", written, fs_path.display());
        self.stat(&path, &fs_path).await
    }

    async fn delete(&self, options: &TransferOptions) -> Result<()> {
        let path = Self::object_path(options)?;
        let fs_path = self.to_fs_path(&path);

        match fs::remove_file(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) if fs_path.is_dir() => Err(Error::InvalidInput(format!(
                "Cannot delete directory {}: {}",
                path, e
            ))),
            Err(e) => Err(Error::from_io(e, &path)),
        }
    }

    fn can_intra_copy(&self, other: &dyn Provider) -> bool {
        other.as_any().is::<LocalProvider>()
    }

    fn can_intra_move(&self, other: &dyn Provider) -> bool {
        other.as_any().is::<LocalProvider>()
    }

    async fn intra_copy(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        let peer = self.peer(dest)?;
        let from = Self::object_path(source_options)?;
        let to = Self::object_path(dest_options)?;
        let from_path = self.to_fs_path(&from);
        let to_path = peer.to_fs_path(&to);

        if from_path.is_dir() {
            return Err(Error::InvalidInput(format!("Cannot copy directory: {}", from)));
        }

        // Copying onto the source itself must not truncate it first.
        Self::ensure_parent(&to_path).await?;
        let part_path = Self::part_path(&to, &to_path);
        if let Err(e) = fs::copy(&from_path, &part_path).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(Error::from_io(e, &from));
        }
        if let Err(e) = fs::rename(&part_path, &to_path).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(Error::from_io(e, &to));
        }

        peer.stat(&to, &to_path).await
    }

    async fn intra_move(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        let peer = self.peer(dest)?;
        let from = Self::object_path(source_options)?;
        let to = Self::object_path(dest_options)?;
        let from_path = self.to_fs_path(&from);
        let to_path = peer.to_fs_path(&to);

        if !from_path.exists() {
            return Err(Error::NotFound(format!("Source not found: {}", from)));
        }
        if from_path.is_dir() {
            return Err(Error::InvalidInput(format!("Cannot move directory: {}", from)));
        }

        Self::ensure_parent(&to_path).await?;
        match fs::rename(&from_path, &to_path).await {
            Ok(()) => peer.stat(&to, &to_path).await,
            Err(e) if e.kind() == ErrorKind::CrossesDevices => Err(Error::Unsupported(format!(
                "{} and {} are on different filesystems",
                self.root.display(),
                peer.root.display()
            ))),
            Err(e) => Err(Error::from_io(e, &from)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn opts(path: &str) -> TransferOptions {
        TransferOptions::with_path(path)
    }

    async fn put(provider: &LocalProvider, path: &str, data: &'static [u8]) -> Metadata {
        provider
            .upload(StreamObject::from_bytes(data, None), &opts(path))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_upload_download() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let metadata = put(&provider, "/docs/test.txt", b"Hello, Local!").await;
        assert_eq!(metadata.size, Some(13));
        assert_eq!(metadata.content_type, "text/plain");

        let obj = provider.download(&opts("/docs/test.txt")).await.unwrap();
        assert_eq!(obj.size, Some(13));
        assert_eq!(obj.content_type, "text/plain");
        assert_eq!(&obj.collect().await.unwrap()[..], b"Hello, Local!");
    }

    #[tokio::test]
    async fn test_local_download_missing() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let result = provider.download(&opts("/missing.bin")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_short_upload_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let mut obj = StreamObject::from_bytes(&b"abc"[..], None);
        obj.size = Some(100);
        let result = provider.upload(obj, &opts("/short.bin")).await;

        assert!(matches!(result, Err(Error::Transfer(_))));
        assert!(!temp.path().join("short.bin").exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        put(&provider, "/a.bin", b"1").await;

        provider.delete(&opts("/a.bin")).await.unwrap();
        assert!(!temp.path().join("a.bin").exists());
        provider.delete(&opts("/a.bin")).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_intra_copy_and_move() {
        let src_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();
        let src = LocalProvider::new(src_dir.path()).unwrap();
        let dst = LocalProvider::new(dst_dir.path()).unwrap();
        put(&src, "/a.txt", b"native").await;

        assert!(src.can_intra_copy(&dst));
        src.intra_copy(&dst, &opts("/a.txt"), &opts("/copy/a.txt"))
            .await
            .unwrap();
        assert!(src_dir.path().join("a.txt").exists());
        assert_eq!(
            std::fs::read(dst_dir.path().join("copy/a.txt")).unwrap(),
            b"native"
        );

        // Both temp dirs usually share a filesystem; a decline is also valid.
        match src.intra_move(&dst, &opts("/a.txt"), &opts("/moved.txt")).await {
            Ok(metadata) => {
                assert_eq!(metadata.name, "moved.txt");
                assert!(!src_dir.path().join("a.txt").exists());
            }
            Err(e) => assert!(e.is_unsupported()),
        }
    }

    #[tokio::test]
    async fn test_local_copy_onto_itself_keeps_content() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        put(&provider, "/a.txt", b"precious").await;

        let metadata = provider
            .copy_to(&provider, &opts("/a.txt"), &opts("/a.txt"))
            .await
            .unwrap();

        assert_eq!(metadata.size, Some(8));
        assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"precious");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_local_copy_missing_source_leaves_no_part_file() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();

        let result = provider
            .intra_copy(&provider, &opts("/absent.txt"), &opts("/b.txt"))
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_move_rejects_directory() {
        let temp = TempDir::new().unwrap();
        let provider = LocalProvider::new(temp.path()).unwrap();
        put(&provider, "/dir/inner.txt", b"x").await;

        let result = provider.move_to(&provider, &opts("/dir"), &opts("/moved")).await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(temp.path().join("dir/inner.txt").exists());
        assert!(!temp.path().join("moved").exists());
    }

    #[tokio::test]
    async fn test_local_move_to_memory_streams_and_deletes() {
        let temp = TempDir::new().unwrap();
        let src = LocalProvider::new(temp.path()).unwrap();
        let dst = crate::memory::MemoryProvider::new();
        put(&src, "/data.json", b"{}").await;

        assert!(!src.can_intra_move(&dst));
        let metadata = src.move_to(&dst, &opts("/data.json"), &opts("/data.json")).await.unwrap();

        assert_eq!(metadata.content_type, "application/json");
        assert!(dst.contains("/data.json"));
        assert!(!temp.path().join("data.json").exists());
    }
}
