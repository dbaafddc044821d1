//! Audit categories and their runtime enable flags.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

/// The closed set of audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// Authentication failed.
    FailedLogin,
    /// Authentication succeeded.
    Authenticated,
    /// The user lacked a privilege required by the request.
    MissingPrivileges,
    /// The user held the privilege required by the request.
    GrantedPrivileges,
    /// The request carried forbidden or spoofed headers.
    BadHeaders,
    /// A write was attempted against the protected configuration index.
    SgIndexAttempt,
    /// A TLS error occurred on the transport or REST layer.
    SslException,
}

impl Category {
    /// Number of categories.
    pub const COUNT: usize = 7;

    /// Every category, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::FailedLogin,
        Self::Authenticated,
        Self::MissingPrivileges,
        Self::GrantedPrivileges,
        Self::BadHeaders,
        Self::SgIndexAttempt,
        Self::SslException,
    ];

    /// Returns the canonical upper-case name of this category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailedLogin => "FAILED_LOGIN",
            Self::Authenticated => "AUTHENTICATED",
            Self::MissingPrivileges => "MISSING_PRIVILEGES",
            Self::GrantedPrivileges => "GRANTED_PRIVILEGES",
            Self::BadHeaders => "BAD_HEADERS",
            Self::SgIndexAttempt => "SG_INDEX_ATTEMPT",
            Self::SslException => "SSL_EXCEPTION",
        }
    }

    /// Categories that are still recorded when a layer's auditing is switched
    /// off or when an unresolved bulk request is seen.
    #[must_use]
    pub const fn is_security_critical(&self) -> bool {
        matches!(
            self,
            Self::FailedLogin | Self::MissingPrivileges | Self::SgIndexAttempt
        )
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AuditError::InvalidCategory {
                name: s.to_string(),
            })
    }
}

static GLOBAL_FLAGS: Lazy<Arc<CategoryFlags>> = Lazy::new(|| Arc::new(CategoryFlags::new()));

/// Per-category on/off switches, flipped at runtime by operators and tests.
///
/// Reads happen on every filter check and writes are rare, so each flag is a
/// plain atomic. All flags start enabled.
#[derive(Debug)]
pub struct CategoryFlags {
    flags: [AtomicBool; Category::COUNT],
}

impl Default for CategoryFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryFlags {
    /// Creates a flag set with every category enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: std::array::from_fn(|_| AtomicBool::new(true)),
        }
    }

    /// Returns the process-wide flag set.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_FLAGS)
    }

    /// Returns whether `category` is currently enabled.
    #[must_use]
    pub fn is_enabled(&self, category: Category) -> bool {
        self.flags[category.index()].load(Ordering::Acquire)
    }

    /// Enables or disables `category`.
    pub fn set_enabled(&self, category: Category, enabled: bool) {
        self.flags[category.index()].store(enabled, Ordering::Release);
        tracing::debug!(target: "vigil_audit", %category, enabled, "audit category toggled");
    }

    /// Re-enables every category.
    pub fn reset(&self) {
        for flag in &self.flags {
            flag.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("FAILED_LOGIN", Category::FailedLogin ; "failed login")]
    #[test_case("authenticated", Category::Authenticated ; "lower case")]
    #[test_case(" Missing_Privileges ", Category::MissingPrivileges ; "mixed case padded")]
    #[test_case("SG_INDEX_ATTEMPT", Category::SgIndexAttempt ; "config index attempt")]
    #[test_case("ssl_exception", Category::SslException ; "ssl")]
    fn category_parses(input: &str, expected: Category) {
        assert_eq!(input.parse::<Category>().ok(), Some(expected));
    }

    #[test]
    fn unknown_category_is_error() {
        let err = "DELETED_EVERYTHING".parse::<Category>();
        assert!(matches!(err, Err(AuditError::InvalidCategory { .. })));
    }

    #[test]
    fn display_round_trips_for_all() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>().ok(), Some(category));
        }
    }

    #[test]
    fn security_critical_set() {
        let critical: Vec<_> = Category::ALL
            .into_iter()
            .filter(Category::is_security_critical)
            .collect();
        assert_eq!(
            critical,
            vec![
                Category::FailedLogin,
                Category::MissingPrivileges,
                Category::SgIndexAttempt
            ]
        );
    }

    #[test]
    fn serde_uses_screaming_names() {
        let json = serde_json::to_string(&Category::GrantedPrivileges).unwrap();
        assert_eq!(json, "\"GRANTED_PRIVILEGES\"");
    }

    #[test]
    fn flags_start_enabled_and_reset() {
        let flags = CategoryFlags::new();
        assert!(Category::ALL.iter().all(|c| flags.is_enabled(*c)));

        flags.set_enabled(Category::BadHeaders, false);
        assert!(!flags.is_enabled(Category::BadHeaders));
        assert!(flags.is_enabled(Category::FailedLogin));

        flags.reset();
        assert!(flags.is_enabled(Category::BadHeaders));
    }

    #[test]
    fn global_flags_are_shared() {
        let a = CategoryFlags::global();
        let b = CategoryFlags::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
