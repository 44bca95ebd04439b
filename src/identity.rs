// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Identity and namespace types.
//!
//! The authentication provider is a black box: it publishes an
//! [`IdentityState`] on a `tokio::sync::watch` channel and the sync layer
//! derives a [`Namespace`] from it.
//!
//! ```
//! use focus_sync::{AccountId, IdentityState, Namespace};
//!
//! let signed_in = IdentityState::SignedIn(AccountId::new("acct-42"));
//! assert_eq!(Namespace::for_identity(&signed_in).as_str(), "acct-42");
//! assert_eq!(Namespace::for_identity(&IdentityState::SignedOut), Namespace::Guest);
//! ```

use serde::{Deserialize, Serialize};

/// Opaque account identifier issued by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authentication state as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    /// Provider has not reported yet
    #[default]
    Unknown,
    /// Using the app without an account
    Guest,
    /// Signed in; the only state that enables remote sync
    SignedIn(AccountId),
    /// Explicitly signed out
    SignedOut,
}

impl IdentityState {
    #[must_use]
    pub fn account(&self) -> Option<&AccountId> {
        match self {
            Self::SignedIn(account) => Some(account),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        matches!(self, Self::SignedIn(_))
    }
}

impl std::fmt::Display for IdentityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Guest => write!(f, "Guest"),
            Self::SignedIn(account) => write!(f, "SignedIn({})", account),
            Self::SignedOut => write!(f, "SignedOut"),
        }
    }
}

/// Storage namespace suffixed onto every local key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Guest,
    Account(AccountId),
}

impl Namespace {
    pub const GUEST: &'static str = "guest";

    /// Account id when signed in, `guest` otherwise.
    #[must_use]
    pub fn for_identity(identity: &IdentityState) -> Self {
        match identity {
            IdentityState::SignedIn(account) => Self::Account(account.clone()),
            _ => Self::Guest,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Guest => Self::GUEST,
            Self::Account(account) => account.as_str(),
        }
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }

    #[must_use]
    pub fn account(&self) -> Option<&AccountId> {
        match self {
            Self::Guest => None,
            Self::Account(account) => Some(account),
        }
    }

    /// Compose `"{base}_{namespace}"`.
    #[must_use]
    pub fn scoped_key(&self, base: &str) -> String {
        format!("{}_{}", base, self.as_str())
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
