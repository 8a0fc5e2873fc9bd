//! Source path templates.
//!
//! A template is literal text with placeholders in braces: `{id}` refers to a
//! named capture group, `{1}` to a numbered one (`{0}` is the whole match).

use crate::router::Captures;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Named(String),
    Index(usize),
}

impl std::fmt::Display for Placeholder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Placeholder::Named(name) => write!(f, "{{{}}}", name),
            Placeholder::Index(index) => write!(f, "{{{}}}", index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

/// Parsed path template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template, rejecting unbalanced braces and malformed placeholders
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(format!("Unclosed '{{' in path template '{}'", raw));
                    }
                    let placeholder = parse_placeholder(&inner).ok_or_else(|| {
                        format!("Invalid placeholder '{{{}}}' in path template '{}'", inner, raw)
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(placeholder));
                }
                '}' => {
                    return Err(format!("Unbalanced '}}' in path template '{}'", raw));
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(p) => Some(p),
            Segment::Literal(_) => None,
        })
    }

    /// Check every placeholder against the groups a pattern declares
    ///
    /// `captures_len` includes the whole-match group 0.
    pub fn check_resolvable(&self, named_groups: &[String], captures_len: usize) -> Result<(), String> {
        for placeholder in self.placeholders() {
            let resolvable = match placeholder {
                Placeholder::Named(name) => named_groups.iter().any(|g| g == name),
                Placeholder::Index(index) => *index < captures_len,
            };
            if !resolvable {
                return Err(format!(
                    "Placeholder {} in path template '{}' does not match any capture group",
                    placeholder, self.raw
                ));
            }
        }
        Ok(())
    }

    /// Substitute captures into the template
    ///
    /// Returns `None` when a referenced group did not participate in the match.
    pub fn render(&self, captures: &Captures) -> Option<String> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(Placeholder::Named(name)) => out.push_str(captures.name(name)?),
                Segment::Placeholder(Placeholder::Index(index)) => {
                    out.push_str(captures.index(*index)?)
                }
            }
        }
        Some(out)
    }
}

fn parse_placeholder(inner: &str) -> Option<Placeholder> {
    let inner = inner.trim();
    if inner.is_empty() {
        return None;
    }
    if inner.bytes().all(|b| b.is_ascii_digit()) {
        return inner.parse().ok().map(Placeholder::Index);
    }
    let mut bytes = inner.bytes();
    let first_ok = bytes
        .next()
        .map(|b| b.is_ascii_alphabetic() || b == b'_')
        .unwrap_or(false);
    if first_ok && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        Some(Placeholder::Named(inner.to_string()))
    } else {
        None
    }
}
