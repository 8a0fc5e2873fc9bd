//! Transform options
//!
//! Options are an opaque key/value map as far as this crate is concerned; the
//! only one interpreted here is the clip duration, which can be clamped when
//! the proxy reports a duration limit.

use std::collections::BTreeMap;

use crate::constants::DURATION_OPTION;

/// Normalized transform options, always iterated in key order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TransformOptions {
    values: BTreeMap<String, String>,
}

impl TransformOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw pairs; keys are trimmed and lowercased, empty entries dropped
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .filter_map(|(k, v)| {
                let key = k.as_ref().trim().to_ascii_lowercase();
                let value = v.as_ref().trim().to_string();
                (!key.is_empty() && !value.is_empty()).then_some((key, value))
            })
            .collect();
        Self { values }
    }

    /// Parse `k=v` items, as given on the command line
    pub fn parse_assignments<'a>(items: impl IntoIterator<Item = &'a str>) -> Result<Self, String> {
        let mut pairs = Vec::new();
        for item in items {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| format!("Option '{}' must be written as key=value", item))?;
            pairs.push((key, value));
        }
        Ok(Self::from_pairs(pairs))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Sorted `k=v` list joined by `,`
    pub fn option_string(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Requested clip duration in seconds, if any
    pub fn duration_secs(&self) -> Option<f64> {
        self.get(DURATION_OPTION).and_then(parse_duration_secs)
    }

    /// Clamp the duration to `max_secs`
    ///
    /// Returns true when the options changed. A missing duration is set to
    /// the maximum.
    pub fn clamp_duration(&mut self, max_secs: f64) -> bool {
        match self.duration_secs() {
            Some(current) if current <= max_secs => false,
            _ => {
                self.set(DURATION_OPTION, format_duration_secs(max_secs));
                true
            }
        }
    }
}

/// Parse `120`, `120s`, `1500ms` or `2m` into seconds
pub fn parse_duration_secs(value: &str) -> Option<f64> {
    let value = value.trim().to_ascii_lowercase();
    let (number, multiplier) = if let Some(n) = value.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60.0)
    } else {
        (value.as_str(), 1.0)
    };
    let parsed: f64 = number.trim().parse().ok()?;
    (parsed.is_finite() && parsed >= 0.0).then_some(parsed * multiplier)
}

pub fn format_duration_secs(secs: f64) -> String {
    if secs.fract() == 0.0 {
        format!("{}s", secs as u64)
    } else {
        format!("{}s", secs)
    }
}
