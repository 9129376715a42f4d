//! Content-addressed fingerprinting and the on-disk binary cache.
//!
//! Any change to any input alters the key, so a cache entry is write-once
//! and can never silently go stale. Concurrent runners computing the same
//! key race benignly: identical keys imply identical bytes.

use crate::error::Error;

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// One fingerprint input: a path and its bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaggedFile {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

impl TaggedFile {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        TaggedFile {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Hex-encoded SHA-256 over module path, module root, gate name, bootstrap
/// bytes, and every input file's path and bytes in sorted-path order, each
/// field zero-terminated.
pub fn cache_key(
    module_path: &str,
    module_root: &Path,
    gate: &str,
    bootstrap: &[u8],
    files: &[TaggedFile],
) -> Result<String, Error> {
    let mut sorted: Vec<&TaggedFile> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    let mut field = |bytes: &[u8]| {
        hasher.update(bytes);
        hasher.update([0u8]);
    };
    field(module_path.as_bytes());
    field(utf8_path(module_root)?.as_bytes());
    field(gate.as_bytes());
    field(bootstrap);
    for file in sorted {
        field(utf8_path(&file.path)?.as_bytes());
        field(&file.content);
    }
    drop(field);
    Ok(hex::encode(hasher.finalize()))
}

/// A non-UTF-8 path would make the key ambiguous.
fn utf8_path(path: &Path) -> Result<&str, Error> {
    path.to_str().ok_or_else(|| {
        Error::InputMisuse(format!(
            "non-UTF-8 path in cache inputs: {}",
            path.display()
        ))
    })
}

/// First 8 bytes of SHA-256 of the project path, hex-encoded. Isolates
/// projects sharing one cache root.
pub fn project_hash(start_dir: &Path) -> Result<String, Error> {
    let digest = Sha256::digest(utf8_path(start_dir)?.as_bytes());
    Ok(hex::encode(&digest[..8]))
}

/// `<cache-root>/targ/<project-hash>/{bin,tmp,mod}`.
#[derive(Clone, Debug)]
pub struct CacheLayout {
    pub root: PathBuf,
}

impl CacheLayout {
    /// The cache root honors the user cache directory convention
    /// (`XDG_CACHE_HOME`, then the home-directory default), falling back to
    /// the system temp path.
    pub fn resolve(start_dir: &Path) -> Result<CacheLayout, Error> {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        CacheLayout::at(&base, start_dir)
    }

    pub fn at(cache_base: &Path, start_dir: &Path) -> Result<CacheLayout, Error> {
        Ok(CacheLayout {
            root: cache_base.join("targ").join(project_hash(start_dir)?),
        })
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn mod_dir(&self) -> PathBuf {
        self.root.join("mod")
    }

    pub fn binary_path(&self, key: &str) -> PathBuf {
        self.bin_dir().join(format!("targ_{key}"))
    }
}

/// A cached binary is valid iff it exists, is a regular file and is marked
/// executable.
pub fn is_valid_binary(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    true
}
