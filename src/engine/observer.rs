// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Debounced local-change observer.
//!
//! Listens to the domain store's change channel. Load and remote-origin
//! events are ignored; each local edit (re)arms the debounce deadline and
//! the push fires once the burst settles. Domains without a debounce push
//! on every local edit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::store::{ChangeEvent, ChangeOrigin};

use super::DomainEngine;

/// Re-check interval when a deadline fires mid-pull
const PULL_WAIT: Duration = Duration::from_millis(50);

enum Wake {
    Event(Result<ChangeEvent, RecvError>),
    Deadline,
}

pub(super) fn spawn(engine: Arc<dyn DomainEngine>, mut events: broadcast::Receiver<ChangeEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let debounce = engine.core().debounce();
        let mut deadline: Option<Instant> = None;

        loop {
            let wake = match deadline {
                Some(at) => tokio::select! {
                    event = events.recv() => Wake::Event(event),
                    _ = sleep_until(at) => Wake::Deadline,
                },
                None => Wake::Event(events.recv().await),
            };

            match wake {
                Wake::Event(Ok(event)) => {
                    if event.origin != ChangeOrigin::Local || !engine.core().is_running() {
                        continue;
                    }
                    // Already pushed by a flush
                    if !engine.core().observe(event.revision) {
                        continue;
                    }
                    engine.core().mark_dirty();
                    match debounce {
                        Some(window) => deadline = Some(Instant::now() + window),
                        None => push(engine.as_ref()).await,
                    }
                }
                Wake::Event(Err(RecvError::Lagged(missed))) => {
                    warn!(domain = %engine.domain(), missed, "Change observer lagged");
                    engine.core().mark_dirty();
                    deadline = Some(Instant::now() + debounce.unwrap_or_default());
                }
                Wake::Event(Err(RecvError::Closed)) => break,
                Wake::Deadline => {
                    if engine.core().is_applying_remote() {
                        deadline = Some(Instant::now() + PULL_WAIT);
                        continue;
                    }
                    deadline = None;
                    push(engine.as_ref()).await;
                }
            }
        }
        debug!(domain = %engine.domain(), "Change observer finished");
    })
}

async fn push(engine: &dyn DomainEngine) {
    if !engine.core().is_running() {
        return;
    }
    match engine.push_to_remote().await {
        Ok(outcome) => debug!(domain = %engine.domain(), outcome = ?outcome, "Observed change pushed"),
        Err(e) => warn!(domain = %engine.domain(), error = %e, "Push after local change failed"),
    }
}
