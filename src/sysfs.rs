use crate::deadline::run_bounded;
use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Abstraction over the sysfs/procfs filesystem root.
/// `/` in production, a temp directory in tests.
#[derive(Debug, Clone)]
pub struct SysfsRoot {
    root: PathBuf,
}

impl SysfsRoot {
    /// Create a SysfsRoot pointing at a custom directory (for testing).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a path relative to this root.
    /// e.g., `path("sys/class/hwmon")` -> `/sys/class/hwmon` or `<test_root>/sys/class/hwmon`
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Read a sysfs/procfs file, trimming whitespace.
    pub fn read(&self, relative: impl AsRef<Path>) -> Result<String> {
        let path = self.path(relative);
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::SysfsRead { path, source: e })
    }

    /// Read a sysfs file, returning None if it doesn't exist or isn't readable.
    pub fn read_optional(&self, relative: impl AsRef<Path>) -> Result<Option<String>> {
        let path = self.path(relative);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Ok(None),
            Err(e) => Err(Error::SysfsRead { path, source: e }),
        }
    }

    /// Read and parse a value. Any I/O or parse failure is `None`.
    pub fn read_value<T: FromStr>(&self, relative: impl AsRef<Path>) -> Option<T> {
        self.read(relative).ok()?.parse().ok()
    }

    /// Read a sysfs file and parse it as a specific type.
    pub fn read_parse<T: FromStr>(&self, relative: impl AsRef<Path>) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let relative = relative.as_ref();
        let value = self.read(relative)?;
        value.parse::<T>().map_err(|e| Error::Parse {
            path: self.path(relative),
            detail: format!("failed to parse '{}': {}", value, e),
        })
    }

    /// Write a value to a sysfs file.
    pub fn write(&self, relative: impl AsRef<Path>, value: &str) -> Result<()> {
        write_path(&self.path(relative), value)
    }

    /// Read under a timeout. A wedged attribute yields `Error::Timeout`.
    pub fn read_bounded(&self, relative: impl AsRef<Path>, timeout: Duration) -> Result<String> {
        let path = self.path(relative);
        let operation = format!("read {}", path.display());
        run_bounded(&operation, timeout, move || {
            std::fs::read_to_string(&path)
                .map(|s| s.trim().to_string())
                .map_err(|e| Error::SysfsRead { path, source: e })
        })
    }

    /// Write under a timeout. A wedged attribute yields `Error::Timeout`.
    ///
    /// The worker is detached on timeout and may still complete the write
    /// later, so a timed-out write leaves the attribute's final value unknown.
    pub fn write_bounded(
        &self,
        relative: impl AsRef<Path>,
        value: &str,
        timeout: Duration,
    ) -> Result<()> {
        let path = self.path(relative);
        let value = value.to_string();
        let operation = format!("write {}", path.display());
        run_bounded(&operation, timeout, move || write_path(&path, &value))
    }

    /// List entries in a sysfs directory, sorted by name.
    pub fn list_dir(&self, relative: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = self.path(relative);
        let entries = std::fs::read_dir(&path).map_err(|e| Error::SysfsRead {
            path: path.clone(),
            source: e,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::SysfsRead {
                path: path.clone(),
                source: e,
            })?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Check if a path exists relative to this root.
    pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
        self.path(relative).exists()
    }

    pub fn is_dir(&self, relative: impl AsRef<Path>) -> bool {
        self.path(relative).is_dir()
    }
}

fn write_path(path: &Path, value: &str) -> Result<()> {
    std::fs::write(path, value).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => Error::PermissionDenied {
            path: path.to_path_buf(),
        },
        ErrorKind::NotFound => Error::NotFound {
            what: "sysfs attribute".into(),
            path: path.to_path_buf(),
        },
        _ => Error::SysfsWrite {
            path: path.to_path_buf(),
            source: e,
        },
    })
}
