//! Wildcard matching for ignore lists and index patterns.
//!
//! A pattern is one of:
//! - `/.../`: a regular expression, anchored to the whole candidate
//! - anything containing `*` or `?`: a glob (`*` any run, `?` one char),
//!   compiled to an anchored regex
//! - anything else: an exact, case-sensitive match

use regex::Regex;

/// A single compiled pattern.
#[derive(Debug, Clone)]
pub enum WildcardPattern {
    /// Literal comparison.
    Exact(String),
    /// Glob with `*` and `?`, compiled to an anchored regex.
    Glob(Regex),
    /// Anchored regular expression.
    Regex(Regex),
    /// A pattern whose regex failed to compile. Never matches.
    Invalid(String),
}

impl WildcardPattern {
    /// Compiles `pattern`.
    ///
    /// Invalid regular expressions are logged and produce a pattern that
    /// matches nothing.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
            let body = &pattern[1..pattern.len() - 1];
            return compile(pattern, &format!("^(?:{body})$")).map_or_else(
                || Self::Invalid(pattern.to_string()),
                Self::Regex,
            );
        }

        if pattern.contains(['*', '?']) {
            compile(pattern, &glob_to_regex(pattern))
                .map_or_else(|| Self::Invalid(pattern.to_string()), Self::Glob)
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    /// Returns true if `candidate` matches this pattern.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(p) => p == candidate,
            Self::Glob(r) | Self::Regex(r) => r.is_match(candidate),
            Self::Invalid(_) => false,
        }
    }

    /// Returns true if this pattern can match more than one string.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Glob(_) | Self::Regex(_))
    }
}

/// An ordered set of patterns; matches when any member matches.
#[derive(Debug, Clone, Default)]
pub struct WildcardMatcher {
    patterns: Vec<WildcardPattern>,
}

impl WildcardMatcher {
    /// Compiles every pattern in `patterns`.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| WildcardPattern::new(p.as_ref()))
                .collect(),
        }
    }

    /// Returns true if no patterns are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns true if any pattern matches `candidate`.
    #[must_use]
    pub fn matches_any(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(candidate))
    }
}

fn compile(pattern: &str, source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(
                target: "vigil_audit",
                pattern,
                error = %e,
                "invalid pattern, it will never match"
            );
            None
        }
    }
}

/// Translates a glob into an anchored regex; `?` is one character, not
/// one byte.
fn glob_to_regex(glob: &str) -> String {
    let mut source = String::from("(?s)^");
    let mut literal = String::new();
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                source.push_str(&regex::escape(&literal));
                literal.clear();
                source.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');
    source
}
