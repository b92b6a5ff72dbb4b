//! Plugin loading — dynamic libraries contributing component specs.
//!
//! A library built against `dflow-core` exports a single well-known
//! symbol (see [`crate::ffi`]) that hands back a pointer to its own
//! local registry slot. Loading a library merges that slot's specs into
//! the calling process's [`crate::registry::Registry`].

use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};

/// A loaded dynamic library, kept alive for as long as any `Task` built
/// from one of its specs might still be running — dropping it would
/// unload code still on the stack.
pub struct LoadedLibrary {
    path: PathBuf,
    #[allow(dead_code)]
    library: Library,
}

impl LoadedLibrary {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn handle(&self) -> &Library {
        &self.library
    }
}

/// Builds the platform-conventional shared library filename for `name`,
/// e.g. `foo` -> `libfoo.so` on Linux, `libfoo.dylib` on macOS,
/// `foo.dll` on Windows.
pub fn platform_filename(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{name}.dylib")
    } else {
        format!("lib{name}.so")
    }
}

/// Loads the shared library at `path`. The caller is responsible for
/// locating the well-known registry-slot symbol via [`crate::ffi`] and
/// merging its contents.
pub fn load_library(path: impl AsRef<Path>) -> Result<LoadedLibrary> {
    let path = path.as_ref().to_path_buf();
    info!(path = %path.display(), "loading component library");
    // SAFETY: the contract is that libraries built against dflow-core
    // export the registry-slot symbol with the ABI `crate::ffi` defines;
    // a library that doesn't is treated as a load error, not UB, since
    // symbol lookup fails before anything is called.
    let library = unsafe { Library::new(&path) }
        .map_err(|e| RuntimeError::LibraryLoadError(path.display().to_string(), e.to_string()))?;
    debug!(path = %path.display(), "library opened");
    Ok(LoadedLibrary { path, library })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_filename_matches_current_target() {
        let name = platform_filename("widgets");
        if cfg!(target_os = "windows") {
            assert_eq!(name, "widgets.dll");
        } else if cfg!(target_os = "macos") {
            assert_eq!(name, "libwidgets.dylib");
        } else {
            assert_eq!(name, "libwidgets.so");
        }
    }

    #[test]
    fn load_library_reports_missing_file() {
        let err = load_library("/nonexistent/path/libnope.so").unwrap_err();
        assert!(matches!(err, RuntimeError::LibraryLoadError(_, _)));
    }
}
