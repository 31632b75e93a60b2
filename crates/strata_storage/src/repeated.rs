//! Repeated-field naming.
//!
//! Column names are dotted paths whose segments may carry an index:
//! `a[*]` (all entries, patterns only), `a[3]` (a concrete entry) or
//! `a[length]` (the length column of array `a`). A physical column name only
//! ever uses concrete indices and `[length]`; flatten-by fields use `[*]`.

use std::fmt;

use strata_common::error::PatternError;

/// Suffix index of one path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Index {
    None,
    All,
    At(u32),
    Length,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Segment {
    pub name: String,
    pub index: Index,
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PatternError> {
        let unparsable = |reason: &str| PatternError::Unparsable {
            pattern: path.to_string(),
            reason: reason.to_string(),
        };
        if path.is_empty() {
            return Err(unparsable("empty path"));
        }
        let mut segments = Vec::new();
        for part in path.split('.') {
            let (name, index) = match part.find('[') {
                None => (part, Index::None),
                Some(open) => {
                    let inner = part[open + 1..]
                        .strip_suffix(']')
                        .ok_or_else(|| unparsable("unterminated index"))?;
                    let index = match inner {
                        "*" => Index::All,
                        "length" => Index::Length,
                        n => Index::At(n.parse().map_err(|_| unparsable("index is not a number"))?),
                    };
                    (&part[..open], index)
                }
            };
            if name.is_empty() {
                return Err(unparsable("empty field name"));
            }
            if name.contains(['[', ']']) {
                return Err(unparsable("stray bracket"));
            }
            segments.push(Segment {
                name: name.to_string(),
                index,
            });
        }
        if segments[..segments.len() - 1]
            .iter()
            .any(|s| s.index == Index::Length)
        {
            return Err(unparsable("[length] must be the last segment"));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn ends_with_all(&self) -> bool {
        self.segments.last().is_some_and(|s| s.index == Index::All)
    }

    pub fn is_length_column(&self) -> bool {
        self.segments.last().is_some_and(|s| s.index == Index::Length)
    }

    /// Every prefix ending in `[*]`, root first.
    /// `a[*].b.c[*]` gives `a[*]`, `a[*].b.c[*]`.
    pub fn repeated_prefixes(&self) -> Vec<FieldPath> {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.index == Index::All)
            .map(|(i, _)| FieldPath {
                segments: self.segments[..=i].to_vec(),
            })
            .collect()
    }

    /// Match the start of this (concrete) path against `pattern`.
    ///
    /// Each `[*]` in the pattern must face a concrete index here; the
    /// indices found are returned in order together with the unmatched rest.
    pub fn match_prefix(&self, pattern: &FieldPath) -> Option<(Vec<u32>, FieldPath)> {
        if self.segments.len() < pattern.segments.len() {
            return None;
        }
        let mut indices = Vec::new();
        for (own, pat) in self.segments.iter().zip(&pattern.segments) {
            if own.name != pat.name {
                return None;
            }
            match (pat.index, own.index) {
                (Index::All, Index::At(i)) => indices.push(i),
                (p, o) if p == o => {}
                _ => return None,
            }
        }
        let rest = FieldPath {
            segments: self.segments[pattern.segments.len()..].to_vec(),
        };
        Some((indices, rest))
    }

    /// True if this is the length column of some concrete instance of
    /// `pattern` (e.g. `a[2].b[length]` for `a[*].b[*]`).
    pub fn is_length_column_of(&self, pattern: &FieldPath) -> bool {
        if !self.is_length_column() || self.segments.len() != pattern.segments.len() {
            return false;
        }
        let last = self.segments.len() - 1;
        self.segments
            .iter()
            .zip(&pattern.segments)
            .enumerate()
            .all(|(i, (own, pat))| {
                own.name == pat.name
                    && match (pat.index, own.index) {
                        (Index::All, Index::Length) => i == last,
                        (Index::All, Index::At(_)) => i != last,
                        (p, o) => p == o && i != last,
                    }
            })
    }

    /// Replace the `[*]` markers, in order, with `indices`. Markers beyond
    /// `indices.len()` stay.
    pub fn with_indices(&self, indices: &[u32]) -> FieldPath {
        let mut it = indices.iter();
        let segments = self
            .segments
            .iter()
            .map(|s| match s.index {
                Index::All => Segment {
                    name: s.name.clone(),
                    index: it.next().map_or(Index::All, |&i| Index::At(i)),
                },
                _ => s.clone(),
            })
            .collect();
        FieldPath { segments }
    }

    /// The same path with its last segment's index replaced by `[length]`.
    pub fn length_column(&self) -> FieldPath {
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            last.index = Index::Length;
        }
        FieldPath { segments }
    }

    /// Drop the indices of the first `depth` segments.
    /// `a[0].b[1].c` stripped at depth 2 is `a.b.c`.
    pub fn strip(&self, depth: usize) -> FieldPath {
        let segments = self
            .segments
            .iter()
            .enumerate()
            .map(|(i, s)| Segment {
                name: s.name.clone(),
                index: if i < depth { Index::None } else { s.index },
            })
            .collect();
        FieldPath { segments }
    }

    pub fn join(&self, rest: &FieldPath) -> FieldPath {
        let mut segments = self.segments.clone();
        segments.extend(rest.segments.iter().cloned());
        FieldPath { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&s.name)?;
            match s.index {
                Index::None => {}
                Index::All => f.write_str("[*]")?,
                Index::At(n) => write!(f, "[{}]", n)?,
                Index::Length => f.write_str("[length]")?,
            }
        }
        Ok(())
    }
}
