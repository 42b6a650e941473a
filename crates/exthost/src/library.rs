//! Thin wrapper around the OS dynamic-library loader.
//!
//! Opens a shared object, resolves symbols, and closes the OS handle on
//! drop. On unix targets the library is opened lazily bound and with
//! `RTLD_NODELETE`, so an instance that outlives an explicit removal from
//! the registry still holds a valid code mapping.

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::debug;

use crate::abi::RawEntryPoint;
use crate::error::{ExtensionError, Result};

/// Platform extension for shared libraries, leading dot included.
#[cfg(target_os = "windows")]
pub const FILE_EXTENSION: &str = ".dll";
/// Platform extension for shared libraries, leading dot included.
#[cfg(target_os = "macos")]
pub const FILE_EXTENSION: &str = ".dylib";
/// Platform extension for shared libraries, leading dot included.
#[cfg(all(unix, not(target_os = "macos")))]
pub const FILE_EXTENSION: &str = ".so";

/// An open shared library. Non-copyable; the OS handle is released when the
/// last owner drops it.
pub struct SharedLibrary {
    filename: PathBuf,
    library: Library,
}

impl SharedLibrary {
    /// Opens the library at `path`.
    ///
    /// The error carries the OS loader's diagnostic string (`dlerror` on
    /// POSIX, the last-error code on Windows).
    pub fn open(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "opening dynamic library");

        #[cfg(unix)]
        let library = unsafe {
            use libloading::os::unix::Library as PosixLibrary;
            PosixLibrary::open(Some(path), libc::RTLD_LAZY | libc::RTLD_NODELETE)
                .map(Library::from)
        };
        #[cfg(not(unix))]
        let library = unsafe { Library::new(path) };

        let library = library.map_err(|e| ExtensionError::LoadFailed(e.to_string()))?;
        Ok(Self {
            filename: path.to_path_buf(),
            library,
        })
    }

    /// Path the library was opened from.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Resolves a named symbol. The symbol borrows the library handle and
    /// cannot outlive it.
    pub fn symbol<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>> {
        unsafe {
            self.library
                .get(name.as_bytes())
                .map_err(|e| ExtensionError::SymbolNotFound(format!("{name}: {e}")))
        }
    }

    /// Resolves an extension entry point, or `None` when the symbol is
    /// absent. A missing symbol is not fatal to the handle.
    pub fn entry_point(&self, name: &str) -> Option<RawEntryPoint> {
        // The raw fn pointer stays valid for as long as the library is
        // loaded; callers keep the SharedLibrary alive alongside it.
        self.symbol::<RawEntryPoint>(name).ok().map(|sym| *sym)
    }
}

impl std::fmt::Debug for SharedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLibrary")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}
