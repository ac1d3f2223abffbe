// src/filesystem/path.rs

//! Path sanitization for release trees and manifest keys
//!
//! Paths come from two untrusted places: the staged release tree handed over
//! by a fetcher and the glob/directory keys of its manifest. Both are reduced
//! to clean relative paths before they are joined onto the application root.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Reduce a path to a clean relative form
///
/// Leading slashes and `.` components are dropped; any `..` component is a
/// traversal attempt and is rejected, as is a path that ends up empty.
///
/// ```
/// use ship::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("/config/app.toml").unwrap(), PathBuf::from("config/app.toml"));
/// assert!(sanitize_path("data/../../etc/passwd").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut clean = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => return Err(Error::PathTraversal(path.display().to_string())),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("'{}' is empty after sanitization", path.display())));
    }
    Ok(clean)
}

/// Join an untrusted relative path onto `root`
///
/// When both sides already exist they are canonicalized and the result must
/// stay under `root`, which catches escapes through symlinks inside the tree.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path)?);

    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
        && !canonical_joined.starts_with(&canonical_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} escapes {}",
            joined.display(),
            root.display()
        )));
    }

    Ok(joined)
}

/// Render a relative path as the `/`-separated key used for glob matching
///
/// The key is lossy for names that are not valid UTF-8; it is only for
/// matching and display, never for locating the file again.
pub fn match_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_root_and_dots() {
        assert_eq!(sanitize_path("///srv/app.py").unwrap(), PathBuf::from("srv/app.py"));
        assert_eq!(sanitize_path("./config/./app.toml").unwrap(), PathBuf::from("config/app.toml"));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert!(sanitize_path("..").is_err());
        assert!(sanitize_path("data/../../secrets").is_err());
        assert!(sanitize_path("/data/../etc/shadow").is_err());
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert!(sanitize_path("").is_err());
        assert!(sanitize_path("/").is_err());
        assert!(sanitize_path("./").is_err());
    }

    #[test]
    fn test_safe_join() {
        let root = PathBuf::from("/srv/app");
        assert_eq!(safe_join(&root, "/static/app.js").unwrap(), PathBuf::from("/srv/app/static/app.js"));
        assert!(safe_join(&root, "static/../../etc").is_err());
    }

    #[test]
    fn test_safe_join_rejects_symlink_escape() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("app");
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        assert!(safe_join(&root, "link").is_err());
    }

    #[test]
    fn test_match_key_uses_forward_slashes() {
        assert_eq!(match_key(Path::new("config/app/settings.toml")), "config/app/settings.toml");
        assert_eq!(match_key(Path::new("./app.py")), "app.py");
    }

    #[test]
    fn test_sanitize_keeps_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw = Path::new(OsStr::from_bytes(b"/docs/r\xe9sum\xe9.txt"));
        let clean = sanitize_path(raw).unwrap();
        assert_eq!(clean.as_os_str().as_bytes(), b"docs/r\xe9sum\xe9.txt");
    }
}
