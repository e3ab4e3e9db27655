//! Host capabilities.
//!
//! The store never touches the filesystem, the privilege model or the
//! platform directly; the host injects these through the traits below.
//! Default implementations cover a normal user-space process
//! ([`StdFileSystem`], [`SystemPlatform`], [`AllowAll`]) and tests
//! ([`MemoryFileSystem`], [`DenyAll`]).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::RngCore;

/// Privilege checks gating every mutation.
pub trait Privilege: Send + Sync {
    /// Whether the current caller has administrator rights.
    fn check_admin_privilege(&self) -> bool;

    /// Whether the current caller holds the named entitlement.
    fn has_entitlement(&self, name: &str) -> bool;
}

/// Grants everything. Suitable when the process itself is the trust boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Privilege for AllowAll {
    fn check_admin_privilege(&self) -> bool {
        true
    }

    fn has_entitlement(&self, _name: &str) -> bool {
        true
    }
}

/// Denies everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl Privilege for DenyAll {
    fn check_admin_privilege(&self) -> bool {
        false
    }

    fn has_entitlement(&self, _name: &str) -> bool {
        false
    }
}

/// Whole-file read/write primitives.
pub trait FileSystem: Send + Sync {
    /// Read a whole file. A missing file is `ErrorKind::NotFound`.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace the whole file with `bytes`.
    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Real filesystem.
///
/// Writes go to `<path>.tmp` first and are renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut temp = path.as_os_str().to_owned();
        temp.push(".tmp");
        let temp_path = PathBuf::from(temp);

        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }
}

/// In-memory filesystem that counts writes.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a file.
    pub fn with_file(self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), bytes.into());
        self
    }

    /// Current contents of a file, if present.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail with `PermissionDenied`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.contents(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "writes disabled",
            ));
        }
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Platform readiness and identity.
pub trait Platform: Send + Sync {
    /// Whether the backing volume is mounted and writable.
    fn is_write_safe(&self) -> bool;

    fn random_bytes(&self, len: usize) -> Vec<u8>;

    /// Platform serial number, if the platform exposes one.
    fn device_serial(&self) -> Option<String>;
}

/// Platform backed by the running process.
///
/// Always write-safe; readiness can be withheld with
/// [`SystemPlatform::set_write_safe`] to model a volume that is not yet
/// mounted.
#[derive(Debug)]
pub struct SystemPlatform {
    serial: Option<String>,
    write_safe: AtomicBool,
}

impl SystemPlatform {
    pub fn new(serial: Option<String>) -> Self {
        Self {
            serial,
            write_safe: AtomicBool::new(true),
        }
    }

    pub fn set_write_safe(&self, safe: bool) {
        self.write_safe.store(safe, Ordering::SeqCst);
    }
}

impl Default for SystemPlatform {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Platform for SystemPlatform {
    fn is_write_safe(&self) -> bool {
        self.write_safe.load(Ordering::SeqCst)
    }

    fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    fn device_serial(&self) -> Option<String> {
        self.serial.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    mod std_file_system {
        use super::*;

        #[test]
        fn write_then_read() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("nvram.plist");

            StdFileSystem.write_file(&path, b"hello").unwrap();
            assert_eq!(StdFileSystem.read_file(&path).unwrap(), b"hello");
            assert!(!dir.path().join("nvram.plist.tmp").exists());
        }

        #[test]
        fn write_creates_parent_directory() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("Extra").join("nvram.plist");

            StdFileSystem.write_file(&path, b"x").unwrap();
            assert!(path.exists());
        }

        #[test]
        fn write_replaces_contents() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("nvram.plist");

            StdFileSystem.write_file(&path, b"a much longer first write").unwrap();
            StdFileSystem.write_file(&path, b"short").unwrap();
            assert_eq!(StdFileSystem.read_file(&path).unwrap(), b"short");
        }

        #[test]
        fn read_missing_is_not_found() {
            let dir = tempdir().unwrap();
            let err = StdFileSystem
                .read_file(&dir.path().join("missing"))
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::NotFound);
        }
    }

    mod memory_file_system {
        use super::*;

        #[test]
        fn counts_writes() {
            let fs = MemoryFileSystem::new();
            let path = Path::new("/nvram.plist");
            fs.write_file(path, b"1").unwrap();
            fs.write_file(path, b"2").unwrap();
            assert_eq!(fs.write_count(), 2);
            assert_eq!(fs.contents(path), Some(b"2".to_vec()));
        }

        #[test]
        fn failing_writes_are_not_counted() {
            let fs = MemoryFileSystem::new();
            fs.set_fail_writes(true);
            assert!(fs.write_file(Path::new("/x"), b"1").is_err());
            assert_eq!(fs.write_count(), 0);
        }

        #[test]
        fn with_file_prepopulates() {
            let fs = MemoryFileSystem::new().with_file("/a", "abc");
            assert_eq!(fs.read_file(Path::new("/a")).unwrap(), b"abc");
        }
    }

    #[test]
    fn system_platform_random_bytes_length() {
        let platform = SystemPlatform::default();
        assert_eq!(platform.random_bytes(6).len(), 6);
        assert!(platform.device_serial().is_none());
    }

    #[test]
    fn system_platform_write_safe_toggle() {
        let platform = SystemPlatform::new(Some("C02XXXXXXXXX".to_string()));
        assert!(platform.is_write_safe());
        platform.set_write_safe(false);
        assert!(!platform.is_write_safe());
        assert_eq!(platform.device_serial().as_deref(), Some("C02XXXXXXXXX"));
    }

    #[test]
    fn privilege_impls() {
        assert!(AllowAll.check_admin_privilege());
        assert!(AllowAll.has_entitlement("anything"));
        assert!(!DenyAll.check_admin_privilege());
        assert!(!DenyAll.has_entitlement("anything"));
    }
}
