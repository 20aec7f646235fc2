//! Script source access.
//!
//! The loader never touches the filesystem directly; it goes through a
//! [`SourceFs`] so hosts can serve scripts from disk ([`OsFs`]) or from
//! memory ([`MemoryFs`], useful for sources embedded in the binary and for
//! deterministic tests).

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, SystemTime};

/// UTF-8 byte order mark.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Modification stamp of a script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Last modification time.
    pub mtime: SystemTime,
    /// Size in bytes.
    pub size: u64,
}

/// Read access to script sources.
pub trait SourceFs {
    /// Stat `path` without reading it.
    fn stat(&self, path: &str) -> io::Result<FileStamp>;

    /// Read the full contents of `path`.
    ///
    /// `size_hint` is the size from the preceding [`stat`](Self::stat).
    fn read(&self, path: &str, size_hint: u64) -> io::Result<Vec<u8>>;
}

/// Strip a leading UTF-8 byte order mark, if present.
#[must_use]
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Scripts on the local filesystem.
///
/// Relative paths resolve against `root` when one is set, otherwise
/// against the process working directory.
#[derive(Debug, Clone, Default)]
pub struct OsFs {
    root: Option<PathBuf>,
}

impl OsFs {
    /// Create a filesystem view rooted at `root`.
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Resolve a script path to its location on disk.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => Path::new(path).to_path_buf(),
        }
    }
}

impl SourceFs for OsFs {
    fn stat(&self, path: &str) -> io::Result<FileStamp> {
        let meta = std::fs::metadata(self.resolve(path))?;
        if !meta.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
        }
        Ok(FileStamp {
            mtime: meta.modified()?,
            size: meta.len(),
        })
    }

    fn read(&self, path: &str, size_hint: u64) -> io::Result<Vec<u8>> {
        use std::io::Read;

        let mut file = std::fs::File::open(self.resolve(path))?;
        let mut buffer = Vec::with_capacity(usize::try_from(size_hint).unwrap_or(0));
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

/// Scripts held in memory.
///
/// Every [`insert`](Self::insert) advances a logical clock, so the stamp of
/// a rewritten source always differs from the previous one. Clones share
/// the same sources, which lets a test keep a handle while the runtime owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    inner: Rc<RefCell<MemoryFsInner>>,
}

#[derive(Debug, Default)]
struct MemoryFsInner {
    files: HashMap<String, (Vec<u8>, SystemTime)>,
    clock: u64,
}

impl MemoryFs {
    /// Create an empty source set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a source, giving it a fresh stamp.
    pub fn insert(&self, path: &str, source: impl Into<Vec<u8>>) {
        let mut inner = self.inner.borrow_mut();
        inner.clock += 1;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(inner.clock);
        inner.files.insert(path.to_string(), (source.into(), mtime));
    }

    /// Remove a source. Returns `true` if it existed.
    pub fn remove(&self, path: &str) -> bool {
        self.inner.borrow_mut().files.remove(path).is_some()
    }

    /// Build a source set from `(path, source)` pairs, e.g. files embedded with `include_str!`.
    #[must_use]
    pub fn from_sources<'a>(sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let fs = Self::new();
        for (path, source) in sources {
            fs.insert(path, source);
        }
        fs
    }
}

impl SourceFs for MemoryFs {
    fn stat(&self, path: &str) -> io::Result<FileStamp> {
        let inner = self.inner.borrow();
        let (bytes, mtime) = inner
            .files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no source named {path}")))?;
        Ok(FileStamp {
            mtime: *mtime,
            size: bytes.len() as u64,
        })
    }

    fn read(&self, path: &str, _size_hint: u64) -> io::Result<Vec<u8>> {
        self.inner
            .borrow()
            .files
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no source named {path}")))
    }
}
