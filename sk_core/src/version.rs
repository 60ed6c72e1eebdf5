//! Version precedence for package manifests
//!
//! Bucket manifests carry free-form version strings that are mostly
//! semantic versions with occasional extra components:
//! - Basic: `1.2.3`, `2.30.0.1`
//! - Prerelease: `1.2.3-rc1`
//! - Build metadata: `1.2.3+20240101` (ignored for precedence)
//! - Vendor suffixes: `2.44.0.windows.1`
//!
//! Comparison rules:
//! - Numeric components compared numerically: `1.10.0 > 1.9.0`
//! - Missing trailing components count as zero: `1.2 == 1.2.0`
//! - Prerelease comes before release: `1.0.0-beta < 1.0.0`
//!
//! Equality is precedence equality; the raw string is kept for the
//! resolution tie-break, which needs to tell `1.2` from `1.2.0`.

use std::cmp::Ordering;

/// A parsed package version
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<Component>,
    prerelease: Vec<Component>,
    original: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Numeric(u64),
    Alpha(String),
}

impl Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Numeric(a), Component::Numeric(b)) => a.cmp(b),
            (Component::Alpha(a), Component::Alpha(b)) => a.cmp(b),
            // "1.0.1" > "1.0.beta"
            (Component::Numeric(_), Component::Alpha(_)) => Ordering::Greater,
            (Component::Alpha(_), Component::Numeric(_)) => Ordering::Less,
        }
    }

    fn is_zero(&self) -> bool {
        matches!(self, Component::Numeric(0))
    }
}

impl Version {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let original = s.to_string();
        let s = s.strip_prefix(['v', 'V']).unwrap_or(s);

        let without_build = match s.find('+') {
            Some(idx) => &s[..idx],
            None => s,
        };

        let (main_part, prerelease) = match without_build.find('-') {
            Some(idx) => (
                &without_build[..idx],
                parse_components(&without_build[idx + 1..]),
            ),
            None => (without_build, Vec::new()),
        };

        Version {
            components: parse_components(main_part),
            prerelease,
            original,
        }
    }

    /// The raw string as written in the manifest
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_older_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Less
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let main = compare_padded(&self.components, &other.components);
        if main != Ordering::Equal {
            return main;
        }

        match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_strict(&self.prerelease, &other.prerelease),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

/// Main components: a missing component equals zero.
fn compare_padded(a: &[Component], b: &[Component]) -> Ordering {
    let zero = Component::Numeric(0);
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).unwrap_or(&zero);
        let y = b.get(i).unwrap_or(&zero);
        let cmp = x.cmp(y);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

/// Prerelease components: the longer list wins when one is a prefix.
fn compare_strict(a: &[Component], b: &[Component]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let cmp = x.cmp(y);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    a.len().cmp(&b.len())
}

fn parse_components(s: &str) -> Vec<Component> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut in_numeric = false;

    for c in s.chars() {
        if c == '.' || c == '-' || c == '_' {
            if !current.is_empty() {
                components.push(parse_component(&current));
                current.clear();
            }
            in_numeric = false;
        } else if c.is_ascii_digit() {
            if !in_numeric && !current.is_empty() {
                components.push(parse_component(&current));
                current.clear();
            }
            in_numeric = true;
            current.push(c);
        } else if c.is_alphanumeric() {
            if in_numeric && !current.is_empty() {
                components.push(parse_component(&current));
                current.clear();
            }
            in_numeric = false;
            current.push(c);
        }
    }

    if !current.is_empty() {
        components.push(parse_component(&current));
    }

    // "1.2.0" and "1.2" must compare equal, so trailing zeros carry no weight
    while components.last().is_some_and(Component::is_zero) && components.len() > 1 {
        components.pop();
    }

    components
}

fn parse_component(s: &str) -> Component {
    match s.parse::<u64>() {
        Ok(n) => Component::Numeric(n),
        Err(_) => Component::Alpha(s.to_lowercase()),
    }
}
