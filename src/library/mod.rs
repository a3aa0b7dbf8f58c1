//! # Music Library
//!
//! The flat directory every uploaded track lives in, and the only code that
//! touches it. The upload pipeline and the read handlers both go through
//! [`MusicLibrary`] so the on-disk rules hold in one place:
//!
//! - A file only appears under its final name once it is complete. Writers
//!   stream into `<name>.part` and link it into place when done.
//! - `.part` files, dotfiles and anything that is not a plain file name are
//!   never resolved, listed or served.
//! - Uploads never overwrite an existing file.
//!
//! ## Rust Concepts:
//! - **Drop guards**: [`PartialFile`] removes an abandoned `.part` file even
//!   if the request future is dropped halfway through an upload
//! - **Generic streams**: `store` accepts any `Stream` of byte chunks, so the
//!   multipart field in production and a `stream::iter` in tests share one path

pub mod formats;

use crate::error::{AppError, AppResult};
use actix_web::web::Bytes;
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Suffix for files that are still being written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// A complete file in the music directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Unique within the directory; this is the file's identity
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl StoredFile {
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }

    /// Name without its extension, i.e. the upload token.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }

    /// Content type implied by the extension.
    pub fn content_type(&self) -> &'static str {
        formats::content_type_for_extension(self.extension().unwrap_or_default())
    }
}

/// Handle to the storage directory.
///
/// Cloning is cheap; every clone points at the same directory.
#[derive(Debug, Clone)]
pub struct MusicLibrary {
    root: PathBuf,
    canonical_extension: String,
}

impl MusicLibrary {
    /// Create the music directory if it is missing and return a handle to it.
    ///
    /// Safe to call more than once. Bootstrap calls it before the server
    /// binds, so no request ever sees a missing directory.
    pub async fn init(root: impl Into<PathBuf>, canonical_extension: &str) -> AppResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            AppError::Storage(format!(
                "cannot create music directory {}: {}",
                root.display(),
                e
            ))
        })?;

        info!(dir = %root.display(), "Music directory ready");

        Ok(Self {
            root,
            canonical_extension: canonical_extension.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for `name` inside the directory, or `None` if `name` is not a
    /// plain, visible, complete file name.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        is_valid_name(name).then(|| self.root.join(name))
    }

    /// Path a writer should use while `name` is still incomplete.
    pub fn partial_path(&self, name: &str) -> AppResult<PathBuf> {
        let path = self
            .resolve(name)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid file name '{}'", name)))?;
        Ok(partial_path_of(&path))
    }

    /// Stream `chunks` into a new file called `name`.
    ///
    /// Fails with `PayloadTooLarge` once more than `max_bytes` arrive, and with
    /// a storage error if `name` is already taken. On any failure the partial
    /// file is removed and nothing appears under `name`.
    pub async fn store<S, E>(&self, name: &str, chunks: S, max_bytes: u64) -> AppResult<StoredFile>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let path = self
            .resolve(name)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid file name '{}'", name)))?;
        let partial_path = partial_path_of(&path);

        // Fail fast; the hard link below is the real guard.
        if self.exists(name).await? {
            return Err(already_exists(name));
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => AppError::Storage(format!(
                    "an upload named '{}' is already in progress",
                    name
                )),
                _ => AppError::Storage(format!("cannot create {}: {}", partial_path.display(), e)),
            })?;
        let mut guard = PartialFile::new(partial_path.clone());

        futures_util::pin_mut!(chunks);
        let mut written: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Upload interrupted: {}", e)))?;
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "File exceeds the upload limit of {} bytes",
                    max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // Unlike rename, a hard link fails if `name` appeared in the meantime.
        match fs::hard_link(&partial_path, &path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(already_exists(name)),
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(&partial_path).await {
            Ok(()) => guard.commit(),
            Err(e) => warn!(path = %partial_path.display(), error = %e, "Failed to unlink partial file"),
        }

        debug!(file = %name, bytes = written, "Stored upload");

        Ok(StoredFile {
            name: name.to_string(),
            path,
            size: written,
        })
    }

    /// Move a finished `<name>.part` into place as `name`, replacing any file
    /// already called `name`.
    pub async fn publish(&self, name: &str) -> AppResult<StoredFile> {
        let path = self
            .resolve(name)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid file name '{}'", name)))?;
        fs::rename(partial_path_of(&path), &path).await?;
        let size = fs::metadata(&path).await?.len();

        Ok(StoredFile {
            name: name.to_string(),
            path,
            size,
        })
    }

    /// Remove `<name>.part` if it exists. Failures are logged, not returned:
    /// this only runs on paths that are already failing.
    pub async fn discard_partial(&self, name: &str) {
        let Ok(partial) = self.partial_path(name) else {
            return;
        };
        match fs::remove_file(&partial).await {
            Ok(()) => debug!(path = %partial.display(), "Removed partial file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %partial.display(), error = %e, "Failed to remove partial file"),
        }
    }

    pub async fn remove(&self, file: &StoredFile) -> AppResult<()> {
        fs::remove_file(&file.path).await?;
        debug!(file = %file.name, "Removed file");
        Ok(())
    }

    pub async fn exists(&self, name: &str) -> AppResult<bool> {
        match self.resolve(name) {
            Some(path) => Ok(fs::try_exists(&path).await?),
            None => Ok(false),
        }
    }

    /// Look up a complete file by name. `Ok(None)` covers both "no such
    /// file" and names that could never be served.
    pub async fn open(&self, name: &str) -> AppResult<Option<StoredFile>> {
        let Some(path) = self.resolve(name) else {
            return Ok(None);
        };

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(StoredFile {
                name: name.to_string(),
                path,
                size: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all canonical-format files, sorted.
    pub async fn list_canonical(&self) -> AppResult<Vec<String>> {
        let suffix = format!(".{}", self.canonical_extension);
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) && is_valid_name(name) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 || name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) {
        return false;
    }
    if name.contains(['/', '\\', '\0']) {
        return false;
    }

    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn already_exists(name: &str) -> AppError {
    AppError::Storage(format!("'{}' already exists, refusing to overwrite", name))
}

fn partial_path_of(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(PARTIAL_SUFFIX);
    PathBuf::from(os)
}

/// Deletes an in-progress `.part` file unless the write was committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, committed: false }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to clean up partial upload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_init_creates_directory_idempotently() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("music");

        MusicLibrary::init(&root, "mp3").await.unwrap();
        assert!(root.is_dir());

        std::fs::write(root.join("keep.mp3"), b"x").unwrap();
        MusicLibrary::init(&root, "mp3").await.unwrap();
        assert!(root.join("keep.mp3").exists());
    }

    #[tokio::test]
    async fn test_store_writes_complete_file() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();

        let stored = library
            .store("123-abc.wav", chunks(&[b"RIFF", b"data"]), 1024)
            .await
            .unwrap();

        assert_eq!(stored.name, "123-abc.wav");
        assert_eq!(stored.size, 8);
        assert_eq!(stored.stem(), "123-abc");
        assert_eq!(stored.content_type(), "audio/wav");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"RIFFdata");
        assert_eq!(dir_entries(tmp.path()), vec!["123-abc.wav"]);
    }

    #[tokio::test]
    async fn test_store_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        std::fs::write(tmp.path().join("taken.mp3"), b"original").unwrap();

        let err = library
            .store("taken.mp3", chunks(&[b"new"]), 1024)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(std::fs::read(tmp.path().join("taken.mp3")).unwrap(), b"original");
        assert_eq!(dir_entries(tmp.path()), vec!["taken.mp3"]);
    }

    #[tokio::test]
    async fn test_store_does_not_clobber_file_created_mid_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        let target = tmp.path().join("race.mp3");

        // The name is free when the upload starts and taken before it ends.
        let body = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"new"))])
            .then(move |chunk| {
                let target = target.clone();
                async move {
                    std::fs::write(&target, b"original").unwrap();
                    chunk
                }
            });

        let err = library.store("race.mp3", body, 1024).await.unwrap_err();

        assert!(matches!(err, AppError::Storage(_)));
        assert_eq!(std::fs::read(tmp.path().join("race.mp3")).unwrap(), b"original");
        assert_eq!(dir_entries(tmp.path()), vec!["race.mp3"]);
    }

    #[tokio::test]
    async fn test_store_enforces_size_limit_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();

        let err = library
            .store("big.mp3", chunks(&[b"0123", b"4567"]), 6)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_store_stream_error_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ]);

        let err = library.store("cut.mp3", broken, 1024).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(dir_entries(tmp.path()).is_empty());
    }

    #[test]
    fn test_resolve_rejects_unsafe_names() {
        let library = MusicLibrary {
            root: PathBuf::from("/srv/music"),
            canonical_extension: "mp3".to_string(),
        };

        assert!(library.resolve("song.mp3").is_some());
        assert!(library.resolve("").is_none());
        assert!(library.resolve("..").is_none());
        assert!(library.resolve("../etc/passwd").is_none());
        assert!(library.resolve("sub/song.mp3").is_none());
        assert!(library.resolve("..\\song.mp3").is_none());
        assert!(library.resolve(".hidden.mp3").is_none());
        assert!(library.resolve("song.mp3.part").is_none());
    }

    #[tokio::test]
    async fn test_list_canonical_skips_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        for name in ["b.mp3", "a.mp3", "c.wav", "d.mp3.part", ".e.mp3"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(tmp.path().join("folder.mp3")).unwrap();

        assert_eq!(library.list_canonical().await.unwrap(), vec!["a.mp3", "b.mp3"]);
    }

    #[tokio::test]
    async fn test_open_and_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();
        std::fs::write(tmp.path().join("here.mp3"), b"12345").unwrap();

        let file = library.open("here.mp3").await.unwrap().unwrap();
        assert_eq!(file.size, 5);
        assert!(library.open("missing.mp3").await.unwrap().is_none());
        assert!(library.open("../here.mp3").await.unwrap().is_none());
        assert!(library.exists("here.mp3").await.unwrap());
        assert!(!library.exists("missing.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_and_discard_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let library = MusicLibrary::init(tmp.path(), "mp3").await.unwrap();

        std::fs::write(library.partial_path("out.mp3").unwrap(), b"encoded").unwrap();
        let published = library.publish("out.mp3").await.unwrap();
        assert_eq!(published.size, 7);
        assert_eq!(dir_entries(tmp.path()), vec!["out.mp3"]);

        std::fs::write(library.partial_path("junk.mp3").unwrap(), b"half").unwrap();
        library.discard_partial("junk.mp3").await;
        library.discard_partial("never-existed.mp3").await;
        assert_eq!(dir_entries(tmp.path()), vec!["out.mp3"]);
    }
}
