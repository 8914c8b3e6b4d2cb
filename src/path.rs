//! Logical storage paths
//!
//! Every back-end is addressed with the same slash-delimited path model.
//! A normalized path is `/` followed by its non-empty segments joined with
//! `/`; the root is `/`. Trailing separators are dropped, whether a path names
//! a folder is carried by [`BlobKind`](crate::BlobKind) instead.

use crate::{Error, Result};

pub const PATH_SEPARATOR: char = '/';
pub const PATH_SEPARATOR_STR: &str = "/";
pub const ROOT_FOLDER_PATH: &str = "/";

/// Normalize a path, keeping the leading separator.
pub fn normalize(path: &str) -> String {
    normalize_with(path, false)
}

/// Normalize a path.
///
/// Repeated separators collapse, whitespace-only segments are dropped and the
/// trailing separator is removed. With `remove_leading_slash` the result is
/// relative (`a/b`), and the root becomes the empty string.
pub fn normalize_with(path: &str, remove_leading_slash: bool) -> String {
    let joined = split(path).join(PATH_SEPARATOR_STR);
    if remove_leading_slash {
        joined
    } else {
        format!("{PATH_SEPARATOR}{joined}")
    }
}

/// Split a path into its non-empty segments.
pub fn split(path: &str) -> Vec<String> {
    path.split(PATH_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Join segments into a normalized path. Inverse of [`split`].
pub fn combine<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = segments
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR_STR);
    normalize(&joined)
}

/// Parent folder of a path. The root is its own parent.
pub fn parent(path: &str) -> String {
    let mut segments = split(path);
    segments.pop();
    combine(segments)
}

/// Last segment of a path, empty for the root.
pub fn name(path: &str) -> String {
    split(path).pop().unwrap_or_default()
}

pub fn is_root(path: &str) -> bool {
    split(path).is_empty()
}

/// Case-sensitive comparison of the normalized forms.
pub fn paths_equal(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// True when `path` lies strictly below `folder`.
pub fn is_within(path: &str, folder: &str) -> bool {
    let path = split(path);
    let folder = split(folder);
    path.len() > folder.len() && path[..folder.len()] == folder[..]
}

/// Normalize a path that must name an object (not the root).
pub fn validate_full_path(path: &str) -> Result<String> {
    if is_root(path) {
        return Err(Error::bad_request(format!(
            "path '{}' does not name a blob",
            path
        )));
    }
    Ok(normalize(path))
}

/// Normalize a path that is about to receive file content.
///
/// Stricter than [`validate_full_path`]: the raw input may not end in a
/// separator, because the leaf name would be empty.
pub fn validate_file_path(path: &str) -> Result<String> {
    let trimmed = path.trim_end();
    if trimmed.ends_with(PATH_SEPARATOR) {
        return Err(Error::bad_request(format!(
            "path '{}' has an empty file name",
            path
        )));
    }
    validate_full_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("//a///b/"), "/a/b");
        assert_eq!(normalize("/a/  /b"), "/a/b");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize_with("/a/b/", true), "a/b");
        assert_eq!(normalize_with("/", true), "");
    }

    #[test]
    fn test_normalize_idempotent() {
        for p in ["", "/", "a", "//a//b//", " / x /y ", "/dir/file.txt", "a/ /b/"] {
            let once = normalize(p);
            assert_eq!(normalize(&once), once, "input {p:?}");

            let relative = normalize_with(p, true);
            assert_eq!(normalize_with(&relative, true), relative);
        }
    }

    #[test]
    fn test_split() {
        assert!(split("").is_empty());
        assert!(split("/").is_empty());
        assert_eq!(split("/a//b/c/"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_combine_round_trip() {
        let cases: Vec<Vec<&str>> = vec![
            vec![],
            vec!["a"],
            vec!["a", "b", "c.txt"],
            vec!["with space", "x"],
        ];
        for segments in cases {
            assert_eq!(split(&combine(&segments)), segments);
        }
        assert_eq!(combine(split("//a/b//")), normalize("//a/b//"));
        assert_eq!(combine(["a/b", "c"]), "/a/b/c");
    }

    #[test]
    fn test_parent_and_root() {
        assert_eq!(parent("/a/b/c"), "/a/b");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent(ROOT_FOLDER_PATH), ROOT_FOLDER_PATH);
        assert!(is_root(ROOT_FOLDER_PATH));
        assert!(is_root(""));
        assert!(is_root("///"));
        assert!(!is_root("/a"));
        assert_eq!(name("/a/b.txt"), "b.txt");
        assert_eq!(name("/"), "");
    }

    #[test]
    fn test_paths_equal() {
        assert!(paths_equal("a/b", "/a//b/"));
        assert!(!paths_equal("/a/B", "/a/b"));
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a/b", "/a"));
        assert!(is_within("/a/b/c", "/"));
        assert!(!is_within("/a", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/", "/"));
    }

    #[test]
    fn test_validation() {
        assert_eq!(validate_full_path("a//b").unwrap(), "/a/b");
        assert!(validate_full_path("/").is_err());
        assert!(validate_full_path("  ").is_err());
        assert_eq!(validate_full_path("/a/").unwrap(), "/a");

        let err = validate_file_path("/a/b/").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::BadRequest);
        assert_eq!(validate_file_path("/a/b.txt").unwrap(), "/a/b.txt");
    }
}
