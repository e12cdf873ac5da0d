//! Helpers for the `/`-separated absolute paths used throughout the pipeline.

/// Normalize a path: collapse repeated and trailing separators, drop `.`
/// segments and resolve `..` lexically. The result is always absolute.
pub fn clean(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a child name onto a parent path.
pub fn join(parent: &str, name: &str) -> String {
    clean(&format!("{}/{}", parent, name))
}

/// The parent of a path. The parent of `/` is `/`.
pub fn parent(path: &str) -> String {
    let cleaned = clean(path);
    match cleaned.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => cleaned[..idx].to_string(),
    }
}

/// The final segment of a path, or `/` for the root.
pub fn base_name(path: &str) -> String {
    let cleaned = clean(path);
    match cleaned.rsplit('/').next() {
        Some("") | None => "/".to_string(),
        Some(name) => name.to_string(),
    }
}

/// Whether `path` is `ancestor` itself or lies somewhere beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.starts_with('/');
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

/// Rewrite the `from` prefix of `path` to `to`. Callers check `is_within` first.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    let rest = if from == "/" {
        &path[1..]
    } else {
        &path[from.len() + 1..]
    };
    join(to, rest)
}
