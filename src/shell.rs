//! Discovery of the POSIX shell used to run service commands.

use std::path::{Path, PathBuf};

/// Result of probing for a shell binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellLocation {
    /// Absolute path to an existing shell binary.
    Found(PathBuf),
    /// None of the candidate locations exist.
    NotFound,
}

impl ShellLocation {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ShellLocation::Found(path) => Some(path),
            ShellLocation::NotFound => None,
        }
    }
}

/// Probes a fixed, ordered list of install locations.
#[derive(Debug, Clone)]
pub struct ShellLocator {
    candidates: Vec<PathBuf>,
}

impl Default for ShellLocator {
    fn default() -> Self {
        Self::new(default_candidates())
    }
}

impl ShellLocator {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Returns the first candidate that exists on disk.
    ///
    /// A missing shell is a normal outcome; callers report it instead of
    /// failing.
    pub fn locate(&self) -> ShellLocation {
        self.candidates
            .iter()
            .find(|path| path.is_file())
            .map(|path| ShellLocation::Found(path.clone()))
            .unwrap_or(ShellLocation::NotFound)
    }
}

/// Well-known shell locations for the current host.
#[cfg(windows)]
pub fn default_candidates() -> Vec<PathBuf> {
    [
        r"C:\Program Files\Git\bin\bash.exe",
        r"C:\Program Files\Git\usr\bin\bash.exe",
        r"C:\Program Files (x86)\Git\bin\bash.exe",
        r"C:\Program Files (x86)\Git\usr\bin\bash.exe",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

/// Well-known shell locations for the current host.
#[cfg(not(windows))]
pub fn default_candidates() -> Vec<PathBuf> {
    ["/bin/bash", "/usr/bin/bash", "/usr/local/bin/bash", "/bin/sh"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("usr-bash");
        let third = dir.path().join("bash");
        std::fs::write(&second, b"").unwrap();
        std::fs::write(&third, b"").unwrap();
        let locator = ShellLocator::new(vec![dir.path().join("missing"), second.clone(), third]);
        assert_eq!(locator.locate(), ShellLocation::Found(second));
    }

    #[test]
    fn directories_are_not_shells() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ShellLocator::new(vec![dir.path().to_path_buf()]);
        assert_eq!(locator.locate(), ShellLocation::NotFound);
    }

    #[test]
    fn missing_shell_is_not_an_error() {
        let locator = ShellLocator::new(vec![PathBuf::from("/definitely/not/here/bash")]);
        let location = locator.locate();
        assert_eq!(location, ShellLocation::NotFound);
        assert!(location.path().is_none());
        assert!(ShellLocator::new(Vec::new()).locate() == ShellLocation::NotFound);
    }
}
