// Native Library loading
// Opens shared libraries and resolves exported function symbols

use crate::config::RuntimeConfig;
use crate::error::LibraryError;
use libloading::{Library, Symbol};
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct NativeLibrary {
    library: Library,
    path: Option<PathBuf>,
}

/// Append the platform's shared library extension to bare names
pub fn with_platform_extension(name: &str) -> String {
    let ext = if cfg!(target_os = "windows") {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    };
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}{}", name, ext)
    }
}

impl NativeLibrary {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; callers choose
        // which libraries they trust
        let library = unsafe { Library::new(path) }.map_err(|source| LibraryError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "opened library");
        Ok(Self {
            library,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open `name`, trying each configured search directory before handing
    /// the plain name to the system loader
    pub fn open_with(name: &str, config: &RuntimeConfig) -> Result<Self, LibraryError> {
        let file_name = with_platform_extension(name);
        for dir in &config.library_search_paths {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return Self::open(candidate);
            }
            tracing::trace!(candidate = %candidate.display(), "library not in search path");
        }
        Self::open(file_name)
    }

    /// Symbols already linked into the running process
    pub fn this_process() -> Result<Self, LibraryError> {
        #[cfg(unix)]
        let library: Library = libloading::os::unix::Library::this().into();
        #[cfg(windows)]
        let library: Library = libloading::os::windows::Library::this()
            .map_err(|source| LibraryError::Load {
                path: PathBuf::from("<process>"),
                source,
            })?
            .into();
        Ok(Self {
            library,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Address of the exported symbol `name`
    pub fn symbol(&self, name: &str) -> Result<*const c_void, LibraryError> {
        let c_name =
            CString::new(name).map_err(|_| LibraryError::InvalidSymbol(name.to_string()))?;
        // SAFETY: the symbol is read as an address only, never called here
        let symbol: Symbol<*const c_void> = unsafe { self.library.get(c_name.as_bytes_with_nul()) }
            .map_err(|e| LibraryError::SymbolNotFound {
                symbol: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(*symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_extension() {
        assert_eq!(with_platform_extension("libm.so.6"), "libm.so.6");
        let bare = with_platform_extension("demo");
        assert!(bare.starts_with("demo."));
    }

    #[test]
    fn test_missing_library() {
        let err = NativeLibrary::open("/nonexistent/libnothing.so").unwrap_err();
        assert!(matches!(err, LibraryError::Load { .. }));
        assert!(err.to_string().contains("libnothing"));
    }

    #[test]
    fn test_missing_symbol() {
        let lib = NativeLibrary::this_process().unwrap();
        assert!(lib.path().is_none());
        let err = lib.symbol("invoker_symbol_that_does_not_exist").unwrap_err();
        assert!(matches!(err, LibraryError::SymbolNotFound { .. }));
        assert!(matches!(
            lib.symbol("bad\0name"),
            Err(LibraryError::InvalidSymbol(_))
        ));
    }

    #[cfg(all(unix, target_env = "gnu"))]
    #[test]
    fn test_resolves_libc_symbol() {
        let lib = NativeLibrary::this_process().unwrap();
        assert!(!lib.symbol("abs").unwrap().is_null());
    }
}
