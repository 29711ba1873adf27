//! Resolution of command path arguments relative to a session's cwd.
//!
//! Absolute inputs pass through unchanged; relative inputs are joined to
//! the cwd with a single `/` separator. Canonicalization (symlink and
//! `..` resolution) is a separate step applied only by the commands that
//! need it (`cd`, `realpath`).

use std::path::{Path, PathBuf};

pub fn resolve(cwd: &str, input: &str) -> PathBuf {
    if input.starts_with('/') {
        return PathBuf::from(input);
    }
    let cwd = cwd.trim_end_matches('/');
    if cwd.is_empty() {
        PathBuf::from(format!("/{input}"))
    } else {
        PathBuf::from(format!("{cwd}/{input}"))
    }
}

pub fn canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_input_passes_through() {
        assert_eq!(resolve("/var", "/etc/passwd"), PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn relative_input_joins_with_single_separator() {
        assert_eq!(resolve("/var", "log"), PathBuf::from("/var/log"));
        assert_eq!(resolve("/var/", "log"), PathBuf::from("/var/log"));
    }

    #[test]
    fn root_cwd_does_not_double_slash() {
        assert_eq!(resolve("/", "etc"), PathBuf::from("/etc"));
    }
}
