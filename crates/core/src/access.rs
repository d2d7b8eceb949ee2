use anyhow::{Context, Result};
use std::fs::{self, Permissions};
use std::path::{Path, PathBuf};

/// Write access to one file for the lifetime of the guard.
///
/// A read-only file is made writable on acquire; the original permissions are put back when the
/// guard drops, whichever way the mutation exits.
#[derive(Debug)]
pub struct WriteAccess {
    path: PathBuf,
    original: Permissions,
    writable: Permissions,
    cleared: bool,
}

impl WriteAccess {
    pub fn acquire(path: &Path) -> Result<Self> {
        let original = fs::metadata(path)
            .with_context(|| format!("属性を取得できませんでした: {}", path.display()))?
            .permissions();
        let writable = writable_permissions(&original);
        let cleared = original.readonly();
        if cleared {
            fs::set_permissions(path, writable.clone()).with_context(|| {
                format!("読み取り専用属性を解除できませんでした: {}", path.display())
            })?;
            log::debug!("読み取り専用属性を一時解除: {}", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            original,
            writable,
            cleared,
        })
    }

    pub fn was_read_only(&self) -> bool {
        self.cleared
    }

    /// Permissions the file carries while the guard is held.
    pub fn writable(&self) -> &Permissions {
        &self.writable
    }
}

impl Drop for WriteAccess {
    fn drop(&mut self) {
        if !self.cleared {
            return;
        }
        if let Err(err) = fs::set_permissions(&self.path, self.original.clone()) {
            log::warn!(
                "読み取り専用属性を復元できませんでした: {}: {err}",
                self.path.display()
            );
        }
    }
}

/// Runs `f` with write access held on `path`.
pub fn with_write_access<T>(path: &Path, f: impl FnOnce(&WriteAccess) -> T) -> Result<T> {
    let access = WriteAccess::acquire(path)?;
    Ok(f(&access))
}

#[cfg(unix)]
fn writable_permissions(original: &Permissions) -> Permissions {
    use std::os::unix::fs::PermissionsExt;
    Permissions::from_mode(original.mode() | 0o200)
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn writable_permissions(original: &Permissions) -> Permissions {
    let mut writable = original.clone();
    writable.set_readonly(false);
    writable
}
