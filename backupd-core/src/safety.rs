//! Destination safety policy.
//!
//! Clearing a destination is unrecoverable, so the same check gates
//! configuration writes, every backup cycle and every clear.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Why a destination was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafeReason {
    Relative,
    FilesystemRoot,
    RootEntry,
    HomeOrAncestor(PathBuf),
    OverlapsSource(PathBuf),
    NotConfigured,
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafeReason::Relative => f.write_str("path is not absolute"),
            UnsafeReason::FilesystemRoot => f.write_str("path is the filesystem root"),
            UnsafeReason::RootEntry => f.write_str("path is a top-level entry of the filesystem root"),
            UnsafeReason::HomeOrAncestor(home) => {
                write!(f, "path is the home directory {} or one of its ancestors", home.display())
            }
            UnsafeReason::OverlapsSource(source) => {
                write!(f, "path overlaps backup item {}", source.display())
            }
            UnsafeReason::NotConfigured => f.write_str("path is not a configured backup destination"),
        }
    }
}

/// Fold `.` and `..` lexically, then resolve symlinks on the longest prefix
/// that exists. Paths that do not exist yet keep their remaining components.
pub fn normalize(path: &Path) -> PathBuf {
    let lexical = fold(path);
    let mut existing = lexical.as_path();
    let mut rest: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

fn fold(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Check `dest` against the protected paths.
///
/// Returns the normalized destination on success.
pub fn check_destination(
    dest: &Path,
    protected_homes: &[PathBuf],
    sources: &[PathBuf],
) -> Result<PathBuf, UnsafeReason> {
    if !dest.is_absolute() {
        return Err(UnsafeReason::Relative);
    }
    let dest = normalize(dest);

    let depth = dest
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .count();
    match depth {
        0 => return Err(UnsafeReason::FilesystemRoot),
        1 => return Err(UnsafeReason::RootEntry),
        _ => {}
    }

    for home in protected_homes {
        if normalize(home).starts_with(&dest) {
            return Err(UnsafeReason::HomeOrAncestor(home.clone()));
        }
    }

    for source in sources {
        let normalized = normalize(source);
        if normalized.starts_with(&dest) || dest.starts_with(&normalized) {
            return Err(UnsafeReason::OverlapsSource(source.clone()));
        }
    }

    Ok(dest)
}

/// Guard used before a destructive clear: `dest` must pass
/// [`check_destination`] and match one of the `allowed` destinations.
pub fn check_clearable(
    dest: &Path,
    allowed: &[PathBuf],
    protected_homes: &[PathBuf],
) -> Result<PathBuf, UnsafeReason> {
    let dest = check_destination(dest, protected_homes, &[])?;
    if allowed.iter().any(|allowed| normalize(allowed) == dest) {
        Ok(dest)
    } else {
        Err(UnsafeReason::NotConfigured)
    }
}

/// Homes that no destination may cover: the state home plus the real user
/// home when they differ.
pub fn protected_homes(home: &Path) -> Vec<PathBuf> {
    let mut homes = vec![home.to_path_buf()];
    if let Some(user_home) = dirs::home_dir() {
        if user_home != home {
            homes.push(user_home);
        }
    }
    homes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("/", UnsafeReason::FilesystemRoot)]
    #[case("/usr", UnsafeReason::RootEntry)]
    #[case("/tmp/..", UnsafeReason::FilesystemRoot)]
    #[case("relative/dir", UnsafeReason::Relative)]
    fn rejects_root_and_root_entries(#[case] dest: &str, #[case] expected: UnsafeReason) {
        let err = check_destination(Path::new(dest), &[], &[]).unwrap_err();
        assert_eq!(err, expected);
    }

    #[test]
    fn rejects_home_and_its_ancestors() {
        let root = TempDir::new().unwrap();
        let home = root.path().join("users").join("alice");
        fs::create_dir_all(&home).unwrap();
        let homes = vec![home.clone()];

        for dest in [home.clone(), root.path().join("users")] {
            let err = check_destination(&dest, &homes, &[]).unwrap_err();
            assert!(matches!(err, UnsafeReason::HomeOrAncestor(_)), "{}: {err}", dest.display());
        }

        let inside = home.join("backups");
        assert!(check_destination(&inside, &homes, &[]).is_ok());
    }

    #[test]
    fn rejects_destination_overlapping_a_source() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("docs");
        fs::create_dir_all(&source).unwrap();

        let inside = source.join("backup");
        let err = check_destination(&inside, &[], &[source.clone()]).unwrap_err();
        assert_eq!(err, UnsafeReason::OverlapsSource(source.clone()));

        let err = check_destination(root.path(), &[], &[source.clone()]).unwrap_err();
        assert_eq!(err, UnsafeReason::OverlapsSource(source));
    }

    #[test]
    #[cfg(unix)]
    fn symlink_to_root_is_resolved_before_checking() {
        let root = TempDir::new().unwrap();
        let link = root.path().join("sneaky");
        std::os::unix::fs::symlink("/", &link).unwrap();

        let err = check_destination(&link, &[], &[]).unwrap_err();
        assert_eq!(err, UnsafeReason::FilesystemRoot);
    }

    #[test]
    fn normalize_keeps_missing_suffix() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("a").join(".").join("b").join("..").join("c");
        let normalized = normalize(&missing);
        assert_eq!(normalized, fs::canonicalize(root.path()).unwrap().join("a").join("c"));
    }

    #[test]
    fn clearable_requires_configured_destination() {
        let root = TempDir::new().unwrap();
        let dest = root.path().join("dest");
        let other = root.path().join("other");

        assert!(check_clearable(&dest, &[dest.clone()], &[]).is_ok());
        assert_eq!(
            check_clearable(&other, &[dest], &[]).unwrap_err(),
            UnsafeReason::NotConfigured
        );
    }
}
