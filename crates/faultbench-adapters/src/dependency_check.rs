//! Startup check for the external binaries the harness shells out to.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Error returned when required binaries are missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependencyError {
    /// Binaries not found on PATH, in check order.
    pub missing: Vec<String>,
}

impl std::fmt::Display for MissingDependencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for binary in &self.missing {
            writeln!(f, "Required dependency '{binary}' not found. Please install {binary}.")?;
        }
        write!(f, "Pass --skip-dependency-check to start anyway.")
    }
}

impl std::error::Error for MissingDependencyError {}

/// Resolves `binary` against `PATH`. Paths containing a separator are
/// checked directly.
pub fn find_binary(binary: &str) -> Option<PathBuf> {
    if binary.contains('/') {
        let path = PathBuf::from(binary);
        return is_executable(&path).then_some(path);
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Checks every binary and reports all the missing ones at once.
pub fn check_dependencies(binaries: &[&str]) -> Result<(), MissingDependencyError> {
    let missing: Vec<String> = binaries
        .iter()
        .filter(|binary| {
            let found = find_binary(binary);
            debug!(binary, found = ?found, "Dependency check");
            found.is_none()
        })
        .map(|binary| (*binary).to_string())
        .collect();

    if missing.is_empty() { Ok(()) } else { Err(MissingDependencyError { missing }) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_shell() {
        assert!(find_binary("sh").is_some());
        assert!(check_dependencies(&["sh"]).is_ok());
    }

    #[test]
    fn test_reports_all_missing() {
        let err =
            check_dependencies(&["sh", "definitely_not_a_real_command_xyz123", "nor_this_one_xyz"])
                .unwrap_err();
        assert_eq!(err.missing, vec!["definitely_not_a_real_command_xyz123", "nor_this_one_xyz"]);
    }

    #[test]
    fn test_error_display() {
        let err = MissingDependencyError {
            missing: vec!["kubectl".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Required dependency 'kubectl' not found"));
        assert!(msg.contains("--skip-dependency-check"));
    }

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-executable");
        std::fs::write(&file, "").unwrap();
        assert!(find_binary(file.to_str().unwrap()).is_none());
    }
}
