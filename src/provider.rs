//! `BookProvider` / `SecretStore` contracts (C1/C2), plus the default
//! filesystem-backed implementations that make this crate runnable standalone.
//!
//! A surrounding desktop application is expected to substitute its own
//! database-backed `BookProvider` and keychain-backed `SecretStore`; the core
//! never depends on anything beyond these two traits.

use crate::model::{BookDescriptor, BookMetadata, FormatTag};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use walkdir::WalkDir;

/// A scoped, released-on-drop handle to a book's file on disk.
///
/// Models §9's "security-scoped file access": `BookProvider::acquire` hands
/// back a real path plus a guard. Implementations without sandboxing (like
/// `FsBookProvider`) make this a no-op; a sandboxed host application gets a
/// seam to release a security-scoped bookmark when the guard drops.
pub struct BookAccess {
    path: PathBuf,
    _release: Option<Box<dyn FnOnce() + Send>>,
}

impl BookAccess {
    /// Wrap a path with no release action (the common, unsandboxed case).
    pub fn direct(path: PathBuf) -> Self {
        Self {
            path,
            _release: None,
        }
    }

    /// Wrap a path with an explicit release callback run on drop.
    pub fn scoped(path: PathBuf, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path,
            _release: Some(Box::new(release)),
        }
    }

    /// The resolved filesystem path, valid for the lifetime of this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Enumerates books, resolves id→path/format/bookmark/metadata (C2).
///
/// Read-only from the core's perspective: `BookDescriptor` values are owned
/// and mutated only by the external library.
pub trait BookProvider: Send + Sync {
    /// Snapshot of every book currently known to the provider.
    fn list(&self) -> Vec<BookDescriptor>;

    /// Resolve a book id to a readable file, or `None` if the id is unknown.
    fn get_book_file_url(&self, id: &str) -> Option<BookAccess>;

    /// The format tag of a known book id.
    fn get_book_format(&self, id: &str) -> Option<FormatTag>;

    /// Security-scoped bookmark data for a book id, if the platform has one.
    ///
    /// Per §9(c): the caller's contract is "attempt resolution, fall back to
    /// direct access" — this method may return stale data; it is the
    /// caller's job to validate and fall back, not this method's.
    fn get_bookmark_data(&self, _id: &str) -> Option<Vec<u8>> {
        None
    }

    /// Best-effort title/authors for a book id, used to embed metadata in
    /// the converter's kindle-profile invocation (§4.7 step 5).
    fn get_book_metadata(&self, id: &str) -> Option<BookMetadata>;
}

/// Stores/retrieves the SMTP password under a named account (C1).
pub trait SecretStore: Send + Sync {
    /// Retrieve the secret stored under `account`, if any.
    fn get(&self, account: &str) -> Option<String>;

    /// Store `value` under `account`, replacing any prior value.
    fn set(&self, account: &str, value: &str) -> std::io::Result<()>;
}

/// Account key the SMTP password is stored under (§6).
pub const SMTP_PASSWORD_ACCOUNT: &str = "smtp.password";

/// Default in-memory `BookProvider` backed by a scanned directory.
///
/// Grounded on the teacher's `AppState::scan_directory_incremental`: a
/// `walkdir` traversal feeding a `rayon` thread pool, with ids derived
/// deterministically from path via `Uuid::new_v5`.
pub struct FsBookProvider {
    root: PathBuf,
    recursive: bool,
    books: Arc<RwLock<Vec<Entry>>>,
    scanning: Arc<AtomicBool>,
}

#[derive(Clone)]
struct Entry {
    descriptor: BookDescriptor,
    path: PathBuf,
}

impl FsBookProvider {
    /// Construct a provider rooted at `root`, performing an initial scan.
    pub fn new(root: impl Into<PathBuf>, recursive: bool) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let provider = Self {
            root,
            recursive,
            books: Arc::new(RwLock::new(Vec::new())),
            scanning: Arc::new(AtomicBool::new(false)),
        };
        provider.rescan();
        Ok(provider)
    }

    /// Re-walk the root directory and rebuild the in-memory snapshot.
    ///
    /// Idempotent with concurrent scans: a scan already in flight causes
    /// this call to return without doing anything, matching the teacher's
    /// `AtomicBool::swap`-guarded `scan_all_libraries`.
    pub fn rescan(&self) {
        if self.scanning.swap(true, Ordering::SeqCst) {
            tracing::debug!("scan already in progress, skipping");
            return;
        }

        let walker = if self.recursive {
            WalkDir::new(&self.root)
        } else {
            WalkDir::new(&self.root).max_depth(1)
        };

        let paths: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .and_then(FormatTag::from_extension)
                    .is_some()
            })
            .collect();

        let entries: Vec<Entry> = paths
            .par_iter()
            .filter_map(|path| build_entry(path))
            .collect();

        let count = entries.len();
        *self.books.write() = entries;
        self.scanning.store(false, Ordering::SeqCst);
        tracing::info!(books = count, root = %self.root.display(), "library scan complete");
    }

    fn find(&self, id: &str) -> Option<Entry> {
        self.books.read().iter().find(|e| e.descriptor.id == id).cloned()
    }
}

fn build_entry(path: &Path) -> Option<Entry> {
    let ext = path.extension()?.to_str()?;
    let format = FormatTag::from_extension(ext)?;
    let metadata = std::fs::metadata(path).ok()?;
    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, path.to_string_lossy().as_bytes()).to_string();
    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.clone());
    let date_added: DateTime<Utc> = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now);

    Some(Entry {
        descriptor: BookDescriptor {
            id,
            title,
            authors: Vec::new(),
            format: format.as_str().to_string(),
            file_size: metadata.len(),
            date_added,
        },
        path: path.to_path_buf(),
    })
}

impl BookProvider for FsBookProvider {
    fn list(&self) -> Vec<BookDescriptor> {
        self.books.read().iter().map(|e| e.descriptor.clone()).collect()
    }

    fn get_book_file_url(&self, id: &str) -> Option<BookAccess> {
        self.find(id).map(|e| BookAccess::direct(e.path))
    }

    fn get_book_format(&self, id: &str) -> Option<FormatTag> {
        self.find(id)
            .and_then(|e| FormatTag::from_extension(&e.descriptor.format))
    }

    fn get_book_metadata(&self, id: &str) -> Option<BookMetadata> {
        let entry = self.find(id)?;
        Some(BookMetadata {
            title: Some(entry.descriptor.title.clone()),
            authors: entry.descriptor.authors.clone(),
            confidence: 1.0,
            source: "filesystem".to_string(),
            ..Default::default()
        })
    }
}

/// Development-convenience `SecretStore` that keeps a single JSON file on
/// disk with owner-only permissions on Unix.
///
/// This is **not** a hardened secret store — it exists so the binary is
/// runnable standalone. A real desktop application should substitute an
/// OS-keychain-backed implementation.
pub struct FileSecretStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl FileSecretStore {
    /// Load (or lazily create) the secret file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = Self::read_file(&path).unwrap_or_default();
        Self {
            path,
            cache: RwLock::new(cache),
        }
    }

    fn read_file(path: &Path) -> Option<HashMap<String, String>> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn persist(&self, map: &HashMap<String, String>) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, account: &str) -> Option<String> {
        self.cache.read().get(account).cloned()
    }

    fn set(&self, account: &str, value: &str) -> std::io::Result<()> {
        let mut map = self.cache.write();
        map.insert(account.to_string(), value.to_string());
        self.persist(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn fs_provider_finds_recognized_formats_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut epub = std::fs::File::create(dir.path().join("book.epub")).unwrap();
        epub.write_all(b"fake epub").unwrap();
        std::fs::File::create(dir.path().join("notes.txt.bak")).unwrap();

        let provider = FsBookProvider::new(dir.path(), true).unwrap();
        let books = provider.list();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].format, "epub");
        assert_eq!(books[0].title, "book");
    }

    #[test]
    fn fs_provider_ids_are_stable_across_rescans() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.epub"), b"x").unwrap();

        let provider = FsBookProvider::new(dir.path(), true).unwrap();
        let id1 = provider.list()[0].id.clone();
        provider.rescan();
        let id2 = provider.list()[0].id.clone();
        assert_eq!(id1, id2);
    }

    #[test]
    fn fs_provider_bookmark_data_is_always_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.epub"), b"x").unwrap();
        let provider = FsBookProvider::new(dir.path(), true).unwrap();
        let id = provider.list()[0].id.clone();
        assert!(provider.get_bookmark_data(&id).is_none());
    }

    #[test]
    fn file_secret_store_round_trips_a_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets.json"));
        assert!(store.get(SMTP_PASSWORD_ACCOUNT).is_none());
        store.set(SMTP_PASSWORD_ACCOUNT, "hunter2").unwrap();
        assert_eq!(store.get(SMTP_PASSWORD_ACCOUNT).as_deref(), Some("hunter2"));

        let reopened = FileSecretStore::new(dir.path().join("secrets.json"));
        assert_eq!(reopened.get(SMTP_PASSWORD_ACCOUNT).as_deref(), Some("hunter2"));
    }
}
