//! POSIX path helpers over `/`-separated strings.
//!
//! Backends see absolute, normalized paths: leading `/`, no `.` or `..`
//! segments, no repeated or trailing separators (except the root itself).

/// Collapses `.`, `..` and repeated separators. Absolute inputs stay
/// absolute and never climb above `/`; an empty relative result is `.`.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(p) if *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

/// Resolves `path` against `base` (which is itself resolved against `/`).
pub fn resolve(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else if base.starts_with('/') {
        normalize(&format!("{base}/{path}"))
    } else {
        normalize(&format!("/{base}/{path}"))
    }
}

pub fn join(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Parent directory of a normalized absolute path; `/` is its own parent.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final segment of a normalized absolute path; empty for `/`.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Splits into `(dirname, basename)`.
pub fn split(path: &str) -> (&str, &str) {
    (dirname(path), basename(path))
}

/// Iterates the non-empty segments of a path.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize("/a/./b/../c//"), "/a/c");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize("a/../../b"), "../b");
        assert_eq!(normalize(""), ".");
    }

    #[test]
    fn resolve_against_cwd() {
        assert_eq!(resolve("/home", "docs/x"), "/home/docs/x");
        assert_eq!(resolve("/home", "/etc"), "/etc");
        assert_eq!(resolve("/", ".."), "/");
    }

    #[test]
    fn dirname_and_basename() {
        assert_eq!(split("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split("/a"), ("/", "a"));
        assert_eq!(split("/"), ("/", ""));
        assert_eq!(join("/", "x"), "/x");
        assert_eq!(join("/a", "x"), "/a/x");
    }
}
