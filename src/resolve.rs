//! Mapping recorded source paths onto workspace files.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Canonical identity of a covered source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileIdentity {
    /// The recorded path lies under one of the candidate roots.
    Workspace { root: PathBuf, relative: PathBuf },
    /// No root matched; the recorded path is used as is.
    Raw { path: PathBuf },
}

impl FileIdentity {
    /// The full path of the file this identity names.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        match self {
            FileIdentity::Workspace { root, relative } => root.join(relative),
            FileIdentity::Raw { path } => path.clone(),
        }
    }

    /// Whether `path` names this file, either as the full path or as the
    /// path relative to its root.
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            FileIdentity::Workspace { relative, .. } if relative == path => true,
            _ => self.path() == path,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileIdentity::Workspace { relative, .. } => write!(f, "{}", relative.display()),
            FileIdentity::Raw { path } => write!(f, "{}", path.display()),
        }
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Resolve `recorded` against `roots`, first match wins.
///
/// A root matches only on a full path segment: `/ws/a` matches
/// `/ws/a/x.c` but not `/ws/ab/x.c`.
#[must_use]
pub fn resolve<P: AsRef<Path>>(recorded: &str, roots: &[P]) -> FileIdentity {
    for root in roots {
        let root = root.as_ref();
        let Some(root_str) = root.to_str() else {
            continue;
        };
        if let Some(relative) = strip_root(recorded, root_str) {
            return FileIdentity::Workspace {
                root: root.to_path_buf(),
                relative: PathBuf::from(relative),
            };
        }
    }
    FileIdentity::Raw {
        path: PathBuf::from(recorded),
    }
}

fn strip_root<'a>(recorded: &'a str, root: &str) -> Option<&'a str> {
    if root.is_empty() {
        return None;
    }
    let rest = recorded.strip_prefix(root)?;
    let relative = if root.ends_with(is_separator) {
        rest
    } else {
        rest.strip_prefix(is_separator)?
    };
    (!relative.is_empty()).then_some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_root_wins() {
        let roots = ["/ws/a", "/ws/b", "/ws"];
        let identity = resolve("/ws/b/src/x.c", &roots);
        assert_eq!(
            identity,
            FileIdentity::Workspace {
                root: PathBuf::from("/ws/b"),
                relative: PathBuf::from("src/x.c"),
            }
        );
        assert_eq!(identity.path(), Path::new("/ws/b").join("src/x.c"));
    }

    #[test]
    fn falls_back_to_raw_path() {
        let identity = resolve("/other/x.c", &["/ws/a", "/ws/b"]);
        assert_eq!(
            identity,
            FileIdentity::Raw {
                path: PathBuf::from("/other/x.c")
            }
        );
        assert_eq!(identity.path(), PathBuf::from("/other/x.c"));
    }

    #[test]
    fn partial_segment_does_not_match() {
        let identity = resolve("/ws/ab/x.c", &["/ws/a"]);
        assert!(matches!(identity, FileIdentity::Raw { .. }));
    }

    #[test]
    fn root_with_trailing_separator() {
        let identity = resolve("/ws/a/x.c", &["/ws/a/"]);
        assert_eq!(identity.to_string(), "x.c");
    }

    #[test]
    fn root_itself_is_not_a_file() {
        let identity = resolve("/ws/a", &["/ws/a"]);
        assert!(matches!(identity, FileIdentity::Raw { .. }));
    }

    #[test]
    fn windows_separators() {
        let identity = resolve(r"C:\ws\src\x.c", &[r"C:\ws"]);
        match identity {
            FileIdentity::Workspace { relative, .. } => {
                assert_eq!(relative, PathBuf::from(r"src\x.c"))
            }
            other => panic!("expected workspace identity, got {other:?}"),
        }
    }

    #[test]
    fn matches_relative_or_full_path() {
        let identity = resolve("/ws/src/x.c", &["/ws"]);
        assert!(identity.matches(Path::new("src/x.c")));
        assert!(identity.matches(Path::new("/ws/src/x.c")));
        assert!(!identity.matches(Path::new("x.c")));
    }
}
