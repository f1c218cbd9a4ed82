use std::fmt;

/// Key is a slash-delimited hierarchical path such as `/a/b/c`.
///
/// Keys built with [`Key::new`] are canonical: a single leading slash, no
/// trailing slash, no empty or `.` segments, and `..` removes the preceding
/// segment. The string form is used verbatim as the backend object name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(String);

impl Key {
    /// Build a canonical key from any path-like string.
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(clean(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn clean(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}
