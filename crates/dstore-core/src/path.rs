//! Document path normalization.
//!
//! A normalized path always starts with a single `/`, separates segments
//! with `/`, and has no trailing slash unless it is the root `/` itself. The
//! first segment names the document's collection.

use std::fmt::Display;

/// The root path. Never a valid document location.
pub const ROOT: &str = "/";

/// Normalize a raw path string.
///
/// ```
/// # use dstore_core::path::normalize;
/// assert_eq!(normalize("a/b"), "/a/b");
/// assert_eq!(normalize("//a/b/"), "/a/b");
/// assert_eq!(normalize(""), "/");
/// ```
#[must_use]
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        ROOT.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Join arbitrary segments into one normalized path.
///
/// Slashes around each segment are trimmed and empty segments are dropped,
/// so `join(["a", "/b/", "", "c"])` yields `/a/b/c`.
#[must_use]
pub fn join<I>(segments: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    let mut joined = String::new();
    for segment in segments {
        let segment = segment.to_string();
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        joined.push('/');
        joined.push_str(segment);
    }
    if joined.is_empty() {
        joined.push('/');
    }
    joined
}

/// Whether a path normalizes to the root.
#[must_use]
pub fn is_root(path: &str) -> bool {
    path.trim_matches('/').is_empty()
}

/// The non-empty segments of a path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// The first segment of a path, i.e. its collection name.
#[must_use]
pub fn first(path: &str) -> Option<&str> {
    components(path).next()
}

/// The last segment of a path.
#[must_use]
pub fn last(path: &str) -> Option<&str> {
    components(path).last()
}
