// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Maps identity changes onto the active storage namespace.
//!
//! On every change of namespace the in-memory domain stores are reset to
//! defaults and reloaded from the new namespace's keys, so nothing written
//! under one account is visible under another. Leaving an account for the
//! guest namespace also wipes the guest's stale data first.
//!
//! ```text
//! Unknown ─┐
//! Guest ───┼──► "guest"
//! SignedOut┘
//! SignedIn(id) ──► id
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::identity::{AccountId, IdentityState, Namespace};
use crate::metrics;
use crate::remote::{tables, Filter, RemoteStore};
use crate::resilience::QUEUE_KEY;
use crate::storage::traits::LocalStore;
use crate::store::DomainStores;
use crate::timestamps::TimestampTracker;

/// What a call to [`NamespaceResolver::resolve`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTransition {
    pub from: Option<Namespace>,
    pub to: Namespace,
    /// False when the namespace was already active
    pub changed: bool,
    pub wiped_guest: bool,
}

pub struct NamespaceResolver {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    stores: DomainStores,
    timestamps: Arc<TimestampTracker>,
    current: Mutex<Option<Namespace>>,
}

impl NamespaceResolver {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        stores: DomainStores,
        timestamps: Arc<TimestampTracker>,
    ) -> Self {
        Self {
            local,
            remote,
            stores,
            timestamps,
            current: Mutex::new(None),
        }
    }

    /// The active namespace, once anything has been resolved.
    #[must_use]
    pub fn current(&self) -> Option<Namespace> {
        self.current.lock().clone()
    }

    /// Switch to the namespace of `identity`. Never fails: unreadable local
    /// state falls back to defaults and the email backfill is best-effort.
    #[tracing::instrument(skip_all, fields(identity = %identity))]
    pub async fn resolve(&self, identity: &IdentityState) -> NamespaceTransition {
        let next = Namespace::for_identity(identity);
        let previous = self.current();
        if previous.as_ref() == Some(&next) {
            debug!(namespace = %next, "Namespace unchanged");
            return NamespaceTransition {
                from: previous,
                to: next,
                changed: false,
                wiped_guest: false,
            };
        }

        let wiped_guest = next.is_guest() && previous.as_ref().is_some_and(|p| !p.is_guest());
        if wiped_guest {
            self.wipe_guest();
        }

        self.stores.reset_all();
        self.timestamps.load_namespace(&next);
        self.stores.load_all(&next);
        *self.current.lock() = Some(next.clone());

        info!(
            from = previous.as_ref().map(Namespace::as_str).unwrap_or("none"),
            to = %next,
            wiped_guest,
            "Namespace switched"
        );
        metrics::record_namespace_switch(wiped_guest);

        if let Some(account) = next.account() {
            self.backfill_contact_email(account).await;
        }

        NamespaceTransition {
            from: previous,
            to: next,
            changed: true,
            wiped_guest,
        }
    }

    fn wipe_guest(&self) {
        let guest = Namespace::Guest;
        self.stores.wipe_all(&guest);
        self.timestamps.clear_namespace(&guest);
        if let Err(e) = self.local.remove(&guest.scoped_key(QUEUE_KEY)) {
            warn!(error = %e, "Failed to remove guest queue");
        }
        info!("Wiped guest data");
    }

    /// Fill a missing contact email from the account profile, once.
    async fn backfill_contact_email(&self, account: &AccountId) {
        if self.stores.settings.read(|s| s.contact_email.is_some()) {
            return;
        }
        let rows = match self
            .remote
            .select(tables::PROFILES, &Filter::eq("id", account.as_str()), None)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                debug!(account = %account, error = %e, "Profile fetch failed, email not backfilled");
                return;
            }
        };
        let email = rows
            .iter()
            .find_map(|row| row.get("email").and_then(|v| v.as_str()))
            .filter(|email| !email.is_empty())
            .map(str::to_string);
        if let Some(email) = email {
            debug!(account = %account, "Backfilled contact email from profile");
            self.stores.settings.apply_remote(|s| s.contact_email = Some(email));
        }
    }
}
