//! Origin check policies.
//!
//! The server asks its policy about every inbound handshake before accepting
//! it. Policies are shared across concurrent handshakes and must be pure
//! functions of the declared origin.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashSet;

// ============================================================================
// OriginPolicy
// ============================================================================

/// Decides whether a handshake from `origin` may proceed.
///
/// `origin` is the `Origin` header of the upgrade request, or `None` when the
/// client sent none (typical for non-browser clients).
pub trait OriginPolicy: Send + Sync + 'static {
    /// Returns `true` to accept the handshake.
    fn is_allowed(&self, origin: Option<&str>) -> bool;
}

impl<F> OriginPolicy for F
where
    F: Fn(Option<&str>) -> bool + Send + Sync + 'static,
{
    fn is_allowed(&self, origin: Option<&str>) -> bool {
        self(origin)
    }
}

// ============================================================================
// AllowAllOrigins
// ============================================================================

/// Accepts every origin, including a missing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllowAllOrigins;

impl OriginPolicy for AllowAllOrigins {
    #[inline]
    fn is_allowed(&self, _origin: Option<&str>) -> bool {
        true
    }
}

// ============================================================================
// AllowedOrigins
// ============================================================================

/// Accepts only origins from a fixed list.
///
/// Comparison ignores ASCII case. Requests without an origin are rejected
/// unless [`allow_missing`](Self::allow_missing) is set.
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins {
    origins: FxHashSet<String>,
    allow_missing: bool,
}

impl AllowedOrigins {
    /// Creates a policy accepting `origins`.
    #[must_use]
    pub fn new(origins: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            origins: origins
                .into_iter()
                .map(|origin| origin.as_ref().to_ascii_lowercase())
                .collect(),
            allow_missing: false,
        }
    }

    /// Also accepts requests that carry no `Origin` header.
    #[inline]
    #[must_use]
    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }
}

impl OriginPolicy for AllowedOrigins {
    fn is_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            Some(origin) => self.origins.contains(&origin.to_ascii_lowercase()),
            None => self.allow_missing,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
