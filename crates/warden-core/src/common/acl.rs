//! Static access-control policy.
//!
//! A policy is a JSON object mapping each consumer to the methods it may call:
//!
//! ```json
//! {
//!     "logger":    ["/warden.Admin/Logging"],
//!     "stat":      ["/warden.Admin/Statistics"],
//!     "biz_user":  ["/warden.Biz/Check", "/warden.Biz/Add"],
//!     "biz_admin": ["/warden.Biz/*"]
//! }
//! ```
//!
//! Each pattern is either a fully-qualified method (`/<service>/<method>`) or
//! a wildcard covering every method of one service (`/<service>/*`). The
//! policy is loaded once and never changes; any malformed entry rejects the
//! whole document.

use crate::{Error, Result};
use core::str::FromStr;
use std::collections::BTreeMap;

/// One allowed-method rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodPattern {
    /// Matches exactly one fully-qualified method.
    Exact(String),
    /// Matches every method of the named service.
    Service(String),
}

impl MethodPattern {
    /// Parses a raw `/<service>/<method>` or `/<service>/*` pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAcl`] if the pattern does not have exactly two
    /// non-empty path segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let (service, method) = split_method(raw).ok_or_else(|| Error::InvalidAcl {
            reason: format!("`{raw}` is not of the form /<service>/<method>"),
        })?;

        if method == "*" {
            Ok(Self::Service(service.to_string()))
        } else {
            Ok(Self::Exact(raw.to_string()))
        }
    }

    /// Returns `true` if this pattern allows `method`.
    pub fn matches(&self, method: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == method,
            Self::Service(service) => {
                split_method(method).is_some_and(|(target, _)| target == service)
            }
        }
    }
}

/// Splits `/<service>/<method>` into its two segments.
///
/// Returns `None` unless the path starts with `/` and has exactly two
/// non-empty segments.
pub fn split_method(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

/// Immutable consumer → allowed-methods mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    entries: BTreeMap<String, Vec<MethodPattern>>,
}

impl Acl {
    /// Loads a policy from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAcl`] if the document is not a JSON object of
    /// string arrays, or if any pattern is malformed. No partial policy is
    /// ever produced.
    pub fn from_json(policy: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(policy).map_err(|e| Error::InvalidAcl {
                reason: e.to_string(),
            })?;

        let entries = raw
            .into_iter()
            .map(|(consumer, patterns)| {
                let patterns = patterns
                    .iter()
                    .map(|p| MethodPattern::parse(p))
                    .collect::<Result<Vec<_>>>()?;
                Ok((consumer, patterns))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self { entries })
    }

    /// Returns `true` iff `consumer` has an entry with a pattern matching
    /// `method`. Unknown consumers are denied.
    pub fn is_allowed(&self, consumer: &str, method: &str) -> bool {
        self.entries
            .get(consumer)
            .is_some_and(|patterns| patterns.iter().any(|p| p.matches(method)))
    }

    /// Like [`Acl::is_allowed`], mapping a denial to
    /// [`Error::PermissionDenied`].
    pub fn authorize(&self, consumer: &str, method: &str) -> Result<()> {
        if self.is_allowed(consumer, method) {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                consumer: consumer.to_string(),
                method: method.to_string(),
            })
        }
    }

    /// Consumers with a policy entry, in lexical order.
    pub fn consumers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for Acl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json(s)
    }
}
