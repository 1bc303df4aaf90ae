//! Cooperative cancellation tokens.
//!
//! A [`CancellationToken`] is a shared flag with an optional parent chain.
//! Work never gets preempted: every operation polls the token at its natural
//! loop boundaries and stops claiming new work once it reports cancelled.
//!
//! Engine components never cancel a caller's token on their own. They
//! [`wrap`](CancellationToken::wrap) it instead, so an abort inside one run
//! stops that run's workers without leaking into the caller.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Cancelled;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a token. Two handles are the same token iff their ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Inner {
    id: TokenId,
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
    /// Created by the engine via `wrap()` rather than by a caller.
    internal: bool,
}

/// Cheaply cloneable handle to a shared cancellation flag.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A fresh root token.
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// A caller-level child: observes this token, cancelling it does not
    /// cancel the parent.
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), false)
    }

    /// An engine-internal wrapper around this token. Behaves like
    /// [`child`](Self::child) but is skipped by [`original`](Self::original).
    pub fn wrap(&self) -> Self {
        Self::build(Some(self.clone()), true)
    }

    fn build(parent: Option<CancellationToken>, internal: bool) -> Self {
        let id = TokenId(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(Inner {
                id,
                cancelled: AtomicBool::new(false),
                parent,
                internal,
            }),
        }
    }

    pub fn id(&self) -> TokenId {
        self.inner.id
    }

    /// Set this token's flag. Idempotent; ancestors are untouched.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// True if this token or any ancestor has been cancelled.
    pub fn is_canceled(&self) -> bool {
        self.canceled_origin().is_some()
    }

    /// Return `Err(Cancelled)` if this token or any ancestor is cancelled.
    pub fn check_canceled(&self) -> Result<(), Cancelled> {
        match self.canceled_origin() {
            Some(origin) => Err(Cancelled { origin }),
            None => Ok(()),
        }
    }

    /// The nearest token in the chain (starting at `self`) whose flag is set.
    fn canceled_origin(&self) -> Option<TokenId> {
        let mut current = Some(self);
        while let Some(token) = current {
            if token.inner.cancelled.load(Ordering::Acquire) {
                return Some(token.inner.id);
            }
            current = token.inner.parent.as_ref();
        }
        None
    }

    pub fn is_internal(&self) -> bool {
        self.inner.internal
    }

    pub fn parent(&self) -> Option<&CancellationToken> {
        self.inner.parent.as_ref()
    }

    /// Unwrap engine-internal wrappers back to the nearest caller token.
    pub fn original(&self) -> &CancellationToken {
        let mut current = self;
        while current.inner.internal {
            match current.inner.parent.as_ref() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    /// Same allocation, not merely an equal state.
    pub fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// True iff `other` is this token or one of its ancestors, i.e. this
    /// token is already running under `other`.
    pub fn is_nested_in(&self, other: &CancellationToken) -> bool {
        let mut current = Some(self);
        while let Some(token) = current {
            if token.same_as(other) {
                return true;
            }
            current = token.inner.parent.as_ref();
        }
        false
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("id", &self.inner.id)
            .field("cancelled", &self.inner.cancelled.load(Ordering::Relaxed))
            .field("internal", &self.inner.internal)
            .field("parent", &self.inner.parent.as_ref().map(|p| p.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());
        token.cancel();
        token.cancel();
        assert!(token.is_canceled());
        assert!(token.check_canceled().is_err());
    }

    #[test]
    fn wrapper_sees_parent_but_not_vice_versa() {
        let root = CancellationToken::new();
        let wrapper = root.wrap();

        wrapper.cancel();
        assert!(wrapper.is_canceled());
        assert!(!root.is_canceled(), "wrapper cancel must not leak upward");

        let other = root.wrap();
        root.cancel();
        assert!(other.is_canceled());
    }

    #[test]
    fn cancelled_reports_origin() {
        let root = CancellationToken::new();
        let wrapper = root.wrap();

        root.cancel();
        let err = wrapper.check_canceled().unwrap_err();
        assert!(err.is_from(&root));
        assert!(!err.is_from(&wrapper));

        let root = CancellationToken::new();
        let wrapper = root.wrap();
        wrapper.cancel();
        let err = wrapper.check_canceled().unwrap_err();
        assert!(err.is_from(&wrapper));
    }

    #[test]
    fn original_skips_internal_wrappers_only() {
        let root = CancellationToken::new();
        let caller_child = root.child();
        let wrapped = caller_child.wrap().wrap();

        assert!(wrapped.original().same_as(&caller_child));
        assert!(caller_child.original().same_as(&caller_child));
        assert!(!wrapped.original().same_as(&root));
    }

    #[test]
    fn nesting_follows_the_parent_chain() {
        let root = CancellationToken::new();
        let wrapped = root.wrap();
        let unrelated = CancellationToken::new();

        assert!(wrapped.is_nested_in(&root));
        assert!(wrapped.is_nested_in(&wrapped));
        assert!(!root.is_nested_in(&wrapped));
        assert!(!wrapped.is_nested_in(&unrelated));
    }

    #[test]
    fn clones_share_identity() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.same_as(&clone));
        assert_eq!(token.id(), clone.id());
        clone.cancel();
        assert!(token.is_canceled());
    }
}
