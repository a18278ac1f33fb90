//! Dotted-path addressing into nested [`Value`] trees.
//!
//! `user.emails.0.address` walks map keys and sequence indexes. A segment wrapped in braces
//! is always a literal key, so `{user.0}.name` has two segments, `user.0` and `name`. Only the
//! outermost brace pair is consumed: `{{x.y}}` yields the key `{x.y}`. A backslash takes the
//! next character literally, which is how keys with unbalanced braces are written: `{a\}b}`.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path {path:?}: {reason}")]
    Invalid { path: String, reason: &'static str },
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("index {index} out of range at {path} (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
    #[error("type mismatch at {path}: {reason}")]
    TypeMismatch { path: String, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// The segment as a map key. Indexes address maps by their decimal string.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Segment::Key(k) => Cow::Borrowed(k),
            Segment::Index(i) => Cow::Owned(i.to_string()),
        }
    }

    fn needs_escape(key: &str) -> bool {
        key.is_empty()
            || key.contains(['.', '{', '}', '\\'])
            || key.bytes().all(|b| b.is_ascii_digit())
    }

    /// Braces in `key` pair up, so it can sit inside a brace pair unchanged.
    fn braces_balanced(key: &str) -> bool {
        let mut depth = 0usize;
        for c in key.chars() {
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => return false,
                '}' => depth -= 1,
                _ => {}
            }
        }
        depth == 0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{i}"),
            Segment::Key(k) if !Segment::needs_escape(k) => f.write_str(k),
            Segment::Key(k) if Segment::braces_balanced(k) && !k.contains('\\') => write!(f, "{{{k}}}"),
            Segment::Key(k) => {
                f.write_str("{")?;
                for c in k.chars() {
                    if matches!(c, '{' | '}' | '\\') {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A parsed path. Parse once with [`Path::parse`] and reuse it for repeated lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn parse(text: &str) -> Result<Self, PathError> {
        text.parse()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Segment> {
        self.0.first()
    }

    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    pub fn key(&self, key: impl Into<String>) -> Path {
        let mut p = self.clone();
        p.0.push(Segment::Key(key.into()));
        p
    }

    pub fn index(&self, index: usize) -> Path {
        let mut p = self.clone();
        p.0.push(Segment::Index(index));
        p
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut p = self.clone();
        p.0.extend(other.0.iter().cloned());
        p
    }

    /// Everything after the first `n` segments.
    pub fn skip(&self, n: usize) -> Path {
        Path(self.0.iter().skip(n).cloned().collect())
    }

    fn prefix(&self, n: usize) -> String {
        Path(self.0[..n.min(self.0.len())].to_vec()).to_string()
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| PathError::Invalid {
            path: text.to_string(),
            reason,
        };
        if text.is_empty() {
            return Ok(Path::root());
        }
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut escaped = false;
        let mut depth = 0usize;
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let next = chars.next().ok_or_else(|| invalid("dangling escape"))?;
                    current.push(next);
                }
                '{' => {
                    if depth == 0 {
                        escaped = true;
                    } else {
                        current.push(c);
                    }
                    depth += 1;
                }
                '}' => {
                    if depth == 0 {
                        return Err(invalid("unbalanced closing brace"));
                    }
                    depth -= 1;
                    if depth > 0 {
                        current.push(c);
                    }
                }
                '.' if depth == 0 => {
                    segments.push(finish_segment(&mut current, escaped).ok_or_else(|| invalid("empty segment"))?);
                    escaped = false;
                }
                _ => current.push(c),
            }
        }
        if depth != 0 {
            return Err(invalid("unbalanced opening brace"));
        }
        segments.push(finish_segment(&mut current, escaped).ok_or_else(|| invalid("empty segment"))?);
        Ok(Path(segments))
    }
}

fn finish_segment(current: &mut String, escaped: bool) -> Option<Segment> {
    let text = std::mem::take(current);
    if escaped {
        return Some(Segment::Key(text));
    }
    if text.is_empty() {
        return None;
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = text.parse() {
            return Some(Segment::Index(i));
        }
    }
    Some(Segment::Key(text))
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

fn empty_container(next: &Segment) -> Value {
    match next {
        Segment::Key(_) => Value::Map(IndexMap::new()),
        Segment::Index(_) => Value::Sequence(Vec::new()),
    }
}

fn vivify(node: &mut Value, seg: &Segment) {
    if node.is_null() {
        *node = empty_container(seg);
    }
}

/// Write `value` at `path`, creating maps and growing sequences on the way.
pub fn put(root: &mut Value, path: &Path, value: Value) -> Result<(), PathError> {
    let Some((last, parents)) = path.0.split_last() else {
        *root = value;
        return Ok(());
    };
    let mut node = root;
    for (depth, seg) in parents.iter().enumerate() {
        let next = &path.0[depth + 1];
        vivify(node, seg);
        node = match (node, seg) {
            (Value::Map(map), seg) => map
                .entry(seg.as_key().into_owned())
                .or_insert_with(|| empty_container(next)),
            (Value::Sequence(items), Segment::Index(i)) => {
                while items.len() <= *i {
                    items.push(empty_container(next));
                }
                &mut items[*i]
            }
            (Value::Sequence(_), Segment::Key(_)) => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    reason: "key segment addresses a sequence",
                });
            }
            _ => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    reason: "cannot descend into a scalar",
                });
            }
        };
    }
    vivify(node, last);
    match (node, last) {
        (Value::Map(map), seg) => {
            map.insert(seg.as_key().into_owned(), value);
        }
        (Value::Sequence(items), Segment::Index(i)) => {
            while items.len() <= *i {
                items.push(Value::Map(IndexMap::new()));
            }
            items[*i] = value;
        }
        (Value::Sequence(_), Segment::Key(_)) => {
            return Err(PathError::TypeMismatch {
                path: path.to_string(),
                reason: "key segment addresses a sequence",
            });
        }
        _ => {
            return Err(PathError::TypeMismatch {
                path: path.to_string(),
                reason: "cannot descend into a scalar",
            });
        }
    }
    Ok(())
}

/// Read the value at `path`.
pub fn get<'v>(root: &'v Value, path: &Path) -> Result<&'v Value, PathError> {
    let mut node = root;
    for (depth, seg) in path.0.iter().enumerate() {
        node = match (node, seg) {
            (Value::Map(map), seg) => map
                .get(seg.as_key().as_ref())
                .ok_or_else(|| PathError::NotFound(path.prefix(depth + 1)))?,
            (Value::Sequence(items), Segment::Index(i)) => {
                items.get(*i).ok_or_else(|| PathError::IndexOutOfRange {
                    path: path.prefix(depth),
                    index: *i,
                    len: items.len(),
                })?
            }
            (Value::Sequence(_), Segment::Key(_)) => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    reason: "key segment addresses a sequence",
                });
            }
            _ => {
                return Err(PathError::TypeMismatch {
                    path: path.prefix(depth + 1),
                    reason: "cannot descend into a scalar",
                });
            }
        };
    }
    Ok(node)
}

/// Every leaf path under `root`, depth first in insertion order.
///
/// With `include_blank`, empty maps and sequences below the root are yielded too.
pub fn all_paths(root: &Value, include_blank: bool) -> AllPaths<'_> {
    AllPaths {
        stack: vec![(Path::root(), root)],
        include_blank,
    }
}

#[derive(Debug, Clone)]
pub struct AllPaths<'v> {
    stack: Vec<(Path, &'v Value)>,
    include_blank: bool,
}

impl Iterator for AllPaths<'_> {
    type Item = Path;

    fn next(&mut self) -> Option<Path> {
        while let Some((path, value)) = self.stack.pop() {
            match value {
                Value::Map(map) if !map.is_empty() => {
                    for (k, v) in map.iter().rev() {
                        self.stack.push((path.key(k.clone()), v));
                    }
                }
                Value::Sequence(items) if !items.is_empty() => {
                    for (i, v) in items.iter().enumerate().rev() {
                        self.stack.push((path.index(i), v));
                    }
                }
                Value::Map(_) | Value::Sequence(_) => {
                    if self.include_blank && !path.is_root() {
                        return Some(path);
                    }
                }
                _ => return Some(path),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_escaped_segments() {
        let p = Path::parse("foo.{bar.baz}.2").unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("foo".into()),
                Segment::Key("bar.baz".into()),
                Segment::Index(2)
            ]
        );
    }

    #[test]
    fn escaped_digits_stay_keys() {
        let p = Path::parse("{get_user.0}.{1}").unwrap();
        assert_eq!(
            p.segments(),
            &[Segment::Key("get_user.0".into()), Segment::Key("1".into())]
        );
        assert_eq!(p.to_string(), "{get_user.0}.{1}");
    }

    #[test]
    fn nested_braces_keep_one_level() {
        let p = Path::parse("{{x.y}}").unwrap();
        assert_eq!(p.segments(), &[Segment::Key("{x.y}".into())]);
        assert_eq!(Path::parse(&p.to_string()).unwrap(), p);
    }

    #[test]
    fn rejects_unbalanced_and_empty() {
        assert!(Path::parse("foo.{bar").is_err());
        assert!(Path::parse("foo}").is_err());
        assert!(Path::parse("foo..bar").is_err());
    }

    #[test]
    fn get_reports_kind_of_failure() {
        let mut root = Value::map();
        put(&mut root, &Path::parse("a.0.b").unwrap(), Value::Int(1)).unwrap();
        assert!(matches!(
            get(&root, &Path::parse("a.c").unwrap()),
            Err(PathError::TypeMismatch { .. })
        ));
        assert!(matches!(
            get(&root, &Path::parse("a.3").unwrap()),
            Err(PathError::IndexOutOfRange { index: 3, len: 1, .. })
        ));
        assert!(matches!(
            get(&root, &Path::parse("z").unwrap()),
            Err(PathError::NotFound(_))
        ));
    }
}
