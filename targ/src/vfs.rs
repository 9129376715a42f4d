use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// The filesystem surface used by discovery, wrapper generation and
/// fingerprinting. Abstracted so those stages can run against an in-memory
/// tree in tests; staging and toolchain invocation always use the real disk.
pub trait Vfs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// All regular files under `root`, in a deterministic order.
    fn walk(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Production adapter over `std::fs` and `walkdir`.
#[derive(Debug, Default)]
pub struct OsFs;

impl Vfs for OsFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn walk(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(root).sort_by_file_name().into_iter();
        for entry in walker {
            let entry = entry.map_err(io::Error::other)?;
            if entry.file_type().is_file() {
                files.push(entry.path().to_path_buf());
            }
        }
        Ok(files)
    }
}

/// In-memory tree keyed by absolute path. Test-only by convention; lives in
/// the crate proper so integration tests can use it too.
#[derive(Debug, Default)]
pub struct MemFs {
    entries: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemFs {
    pub fn new() -> Self {
        MemFs::default()
    }

    pub fn seed(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.entries
            .lock()
            .unwrap()
            .insert(path.into(), contents.into());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }
}

impl Vfs for MemFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        match self.entries.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }

    fn walk(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|path| path.starts_with(root))
            .cloned()
            .collect())
    }
}
