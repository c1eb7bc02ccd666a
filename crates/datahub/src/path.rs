//! Resource path grammar: `/([^/]+)(/[^/]+)*`.
//!
//! Segments are bounded UTF-8 and may not be `.` or `..`. Redundant
//! slashes are malformed rather than normalized away.

use crate::error::{Error, Result};

/// Maximum byte length of one path segment.
pub const MAX_SEGMENT_LEN: usize = 47;

/// Maximum byte length of a full resource path.
pub const MAX_PATH_LEN: usize = 511;

/// Check one tree entry name: non-empty, bounded, no '/', not a dot segment.
pub fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::bad_parameter("empty path segment"));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(Error::bad_parameter(format!(
            "path segment longer than {} bytes",
            MAX_SEGMENT_LEN
        )));
    }
    if segment.contains('/') {
        return Err(Error::bad_parameter("path segment contains '/'"));
    }
    if segment == "." || segment == ".." {
        return Err(Error::bad_parameter("dot segments are not allowed"));
    }
    Ok(())
}

/// Check a path that is relative to some namespace (no leading '/').
pub fn check_relative(path: &str) -> Result<()> {
    if path.starts_with('/') {
        return Err(Error::bad_parameter("expected a relative path"));
    }
    check_segments(path)
}

/// Check an absolute path (leading '/').
pub fn check_absolute(path: &str) -> Result<()> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(Error::bad_parameter("path is not absolute"));
    };
    check_segments(rest)
}

fn check_segments(path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(Error::bad_parameter(format!(
            "path longer than {} bytes",
            MAX_PATH_LEN
        )));
    }
    if path.is_empty() {
        return Err(Error::bad_parameter("empty path"));
    }
    for segment in path.split('/') {
        check_segment(segment)?;
    }
    Ok(())
}

/// Iterate the segments of a checked path, absolute or relative.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn absolute_paths() {
        assert!(check_absolute("/a").is_ok());
        assert!(check_absolute("/app/sensor/temp").is_ok());

        assert!(check_absolute("a/b").is_err());
        assert!(check_absolute("/").is_err());
        assert!(check_absolute("//a").is_err());
        assert!(check_absolute("/a//b").is_err());
        assert!(check_absolute("/a/").is_err());
        assert!(check_absolute("/a/./b").is_err());
        assert!(check_absolute("/a/../b").is_err());
    }

    #[test]
    fn relative_paths() {
        assert!(check_relative("obs1").is_ok());
        assert!(check_relative("a/b/c").is_ok());
        assert!(check_relative("/a").is_err());
        assert!(check_relative("").is_err());
    }

    #[test]
    fn length_bounds() {
        let long_segment = "x".repeat(MAX_SEGMENT_LEN);
        assert!(check_relative(&long_segment).is_ok());
        let too_long = "x".repeat(MAX_SEGMENT_LEN + 1);
        assert!(check_relative(&too_long).is_err());

        let mut path = String::from("/");
        while path.len() <= MAX_PATH_LEN {
            path.push_str("abcdefgh/");
        }
        path.push('x');
        assert!(check_absolute(&path).is_err());
    }

    #[test]
    fn segment_iteration() {
        let collected: Vec<_> = segments("/app/p/t").collect();
        assert_eq!(collected, vec!["app", "p", "t"]);
        let collected: Vec<_> = segments("a/b").collect();
        assert_eq!(collected, vec!["a", "b"]);
    }
}
