//! Tar-root-relative path normalization
//!
//! Every path handed to or returned from the layer filesystem is normalized
//! to a root-relative form. `.` and empty components drop out, `..` pops,
//! and popping past the root clamps there, so no request can name anything
//! outside the archive.

/// Normalize a raw path to its tar-root-relative form
pub fn normalize(raw: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for comp in raw.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    out.join("/")
}

/// Split a normalized path into its parent directory and file name
pub fn split(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path),
    }
}

/// Join a parent directory with a child component, then normalize
pub fn join(dir: &str, child: &str) -> String {
    if dir.is_empty() {
        normalize(child)
    } else {
        normalize(&format!("{dir}/{child}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_dot_and_root() {
        assert_eq!(normalize("./etc/os-release"), "etc/os-release");
        assert_eq!(normalize("/etc/os-release"), "etc/os-release");
        assert_eq!(normalize("etc//os-release"), "etc/os-release");
    }

    #[test]
    fn test_normalize_resolves_dotdot() {
        assert_eq!(normalize("usr/lib/../bin/sh"), "usr/bin/sh");
    }

    #[test]
    fn test_normalize_clamps_at_root() {
        assert_eq!(normalize("../../../../etc/passwd"), "etc/passwd");
        assert_eq!(normalize("a/../../etc"), "etc");
        assert_eq!(normalize(".."), "");
    }

    #[test]
    fn test_split() {
        assert_eq!(split("var/lib/dpkg/status"), ("var/lib/dpkg", "status"));
        assert_eq!(split("status"), ("", "status"));
    }

    #[test]
    fn test_join() {
        assert_eq!(join("usr/lib", "../bin/sh"), "usr/bin/sh");
        assert_eq!(join("", "etc"), "etc");
    }
}
