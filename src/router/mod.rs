// Router module
//
// Matches request paths against the configured origin patterns. Patterns are
// compiled once when the matcher is built; identical pattern strings share a
// single compiled regex. The matcher is immutable: reconfiguration builds a
// new one and swaps it in (see `crate::reload`).

use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::EdgeError;

/// Definition of a path pattern before compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternDef {
    pub name: String,
    pub regex: String,
    pub priority: Option<i32>,
}

impl PatternDef {
    pub fn new(name: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regex: regex.into(),
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    pub name: String,
    pub priority: Option<i32>,
    regex: Arc<Regex>,
    /// Position in the configuration; breaks priority ties
    declaration_index: usize,
}

impl PathPattern {
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Named capture groups declared by the regex
    pub fn capture_names(&self) -> Vec<String> {
        self.regex.capture_names().flatten().map(String::from).collect()
    }

    /// Number of capture groups, including the implicit whole-match group 0
    pub fn captures_len(&self) -> usize {
        self.regex.captures_len()
    }

    fn sort_key(&self) -> (i32, usize) {
        (self.priority.unwrap_or(i32::MAX), self.declaration_index)
    }
}

/// Captured values from a successful match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    numbered: Vec<Option<String>>,
    named: BTreeMap<String, String>,
}

impl Captures {
    /// Build captures directly, mainly useful when resolving templates offline
    pub fn new(numbered: Vec<Option<String>>, named: BTreeMap<String, String>) -> Self {
        Self { numbered, named }
    }

    /// Value of a numbered group (0 is the whole match)
    pub fn index(&self, index: usize) -> Option<&str> {
        self.numbered.get(index).and_then(|v| v.as_deref())
    }

    /// Value of a named group
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    pub fn named(&self) -> &BTreeMap<String, String> {
        &self.named
    }
}

/// A pattern that matched a path, with its captures
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: PathPattern,
    pub captures: Captures,
}

impl PatternMatch {
    pub fn name(&self) -> &str {
        &self.pattern.name
    }
}

/// Priority-ordered set of compiled path patterns
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    patterns: Vec<PathPattern>,
}

impl PatternMatcher {
    /// Compile pattern definitions
    ///
    /// # Errors
    /// Returns `EdgeError::Validation` for an invalid regex or a duplicate name.
    pub fn new(defs: &[PatternDef]) -> Result<Self, EdgeError> {
        let mut compiled: HashMap<&str, Arc<Regex>> = HashMap::new();
        let mut seen_names = HashSet::new();
        let mut patterns = Vec::with_capacity(defs.len());

        for (declaration_index, def) in defs.iter().enumerate() {
            if !seen_names.insert(def.name.as_str()) {
                return Err(EdgeError::Validation(format!(
                    "Duplicate pattern name '{}'",
                    def.name
                )));
            }

            let regex = match compiled.get(def.regex.as_str()) {
                Some(regex) => Arc::clone(regex),
                None => {
                    let regex = Regex::new(&def.regex).map_err(|e| {
                        EdgeError::Validation(format!(
                            "Pattern '{}' has invalid regex '{}': {}",
                            def.name, def.regex, e
                        ))
                    })?;
                    let regex = Arc::new(regex);
                    compiled.insert(def.regex.as_str(), Arc::clone(&regex));
                    regex
                }
            };

            patterns.push(PathPattern {
                name: def.name.clone(),
                priority: def.priority,
                regex,
                declaration_index,
            });
        }

        // Stable sort keeps declaration order for equal priorities
        patterns.sort_by_key(PathPattern::sort_key);

        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }

    pub fn get(&self, name: &str) -> Option<&PathPattern> {
        self.patterns.iter().find(|p| p.name == name)
    }

    /// Highest-priority pattern matching `path`
    pub fn find_first_match(&self, path: &str) -> Option<PatternMatch> {
        self.patterns
            .iter()
            .find_map(|pattern| Self::try_match(pattern, path))
    }

    /// Every pattern matching `path`, in priority order
    pub fn find_all_matches(&self, path: &str) -> Vec<PatternMatch> {
        self.patterns
            .iter()
            .filter_map(|pattern| Self::try_match(pattern, path))
            .collect()
    }

    fn try_match(pattern: &PathPattern, path: &str) -> Option<PatternMatch> {
        let caps = pattern.regex.captures(path)?;

        let numbered = caps
            .iter()
            .map(|m| m.map(|m| m.as_str().to_string()))
            .collect();

        let named = pattern
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        Some(PatternMatch {
            pattern: pattern.clone(),
            captures: Captures { numbered, named },
        })
    }
}
