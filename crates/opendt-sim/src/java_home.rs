//! Java installation discovery for the simulator binary.

use std::path::{Path, PathBuf};

use crate::error::{Result, SimError};

const COMMON_JVM_PATHS: &[&str] = &[
    "/usr/lib/jvm/java-21-openjdk-arm64",
    "/usr/lib/jvm/java-21-openjdk-amd64",
    "/usr/lib/jvm/default-java",
    "/usr/lib/jvm/java-21",
    "/opt/java/openjdk",
];

/// Locate a Java home: `JAVA_HOME` if set and present, then the system
/// `java` binary resolved through its symlink, then well-known install
/// directories.
///
/// # Errors
///
/// Returns [`SimError::JavaHome`] when no installation can be found.
pub fn detect_java_home() -> Result<PathBuf> {
    if let Ok(java_home) = std::env::var("JAVA_HOME") {
        let path = PathBuf::from(&java_home);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(java_home = %java_home, "JAVA_HOME is set but does not exist, probing");
    }

    if let Some(home) = resolve_from_java_binary(Path::new("/usr/bin/java")) {
        tracing::debug!(java_home = %home.display(), "Auto-detected Java home from java binary");
        return Ok(home);
    }

    for candidate in COMMON_JVM_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            tracing::info!(java_home = %candidate, "Found Java home at common path");
            return Ok(path.to_path_buf());
        }
    }

    if let Some(home) = first_jvm_under(Path::new("/usr/lib/jvm")) {
        tracing::info!(java_home = %home.display(), "Found Java home under /usr/lib/jvm");
        return Ok(home);
    }

    Err(SimError::JavaHome(
        "could not detect a Java installation; set JAVA_HOME".into(),
    ))
}

/// Java home is the grandparent of the resolved `bin/java` binary.
fn resolve_from_java_binary(java: &Path) -> Option<PathBuf> {
    let resolved = std::fs::canonicalize(java).ok()?;
    let home = resolved.parent()?.parent()?.to_path_buf();
    home.join("bin/java").exists().then_some(home)
}

/// First directory under `root` (sorted by name) that contains `bin/java`.
fn first_jvm_under(root: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.join("bin/java").exists())
        .collect();
    entries.sort();
    entries.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_wins_when_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("JAVA_HOME", dir.path());
        let home = detect_java_home().unwrap();
        assert_eq!(home, dir.path());
        std::env::remove_var("JAVA_HOME");
    }

    #[test]
    fn first_jvm_under_picks_sorted_candidate() {
        let root = tempfile::tempdir().unwrap();
        for name in ["b-jdk", "a-jdk"] {
            let bin = root.path().join(name).join("bin");
            std::fs::create_dir_all(&bin).unwrap();
            std::fs::write(bin.join("java"), b"").unwrap();
        }
        let found = first_jvm_under(root.path()).unwrap();
        assert!(found.ends_with("a-jdk"));
    }

    #[test]
    fn first_jvm_under_ignores_dirs_without_java() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("not-a-jdk")).unwrap();
        assert!(first_jvm_under(root.path()).is_none());
    }
}
