// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replays queued operations against the remote store.
//!
//! Payloads are the same documents the engines build for a direct push, so
//! a queued write has exactly the effect the failed push would have had.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::identity::AccountId;
use crate::model::Domain;
use crate::remote::{tables, RemoteError, RemoteStore};
use crate::resilience::{OperationExecutor, SyncOperation};

use super::{presets, sessions, settings, tasks};

pub struct RemoteExecutor {
    remote: Arc<dyn RemoteStore>,
}

impl RemoteExecutor {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }
}

fn decode<T: DeserializeOwned>(table: &str, payload: &Value) -> Result<T, RemoteError> {
    serde_json::from_value(payload.clone()).map_err(|e| RemoteError::Decode {
        table: table.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl OperationExecutor for RemoteExecutor {
    async fn execute(&self, account: &AccountId, op: &SyncOperation) -> Result<(), RemoteError> {
        let remote = self.remote.as_ref();
        match op.domain {
            Domain::Settings => settings::write_payload(remote, op.payload.clone()).await,
            Domain::Presets => {
                let payload = decode(tables::PRESETS, &op.payload)?;
                presets::write_payload(remote, account, payload).await
            }
            Domain::Sessions => {
                let payload = decode(tables::SESSIONS, &op.payload)?;
                sessions::write_payload(remote, payload).await
            }
            Domain::Tasks => {
                let payload = decode(tables::TASKS, &op.payload)?;
                tasks::write_payload(remote, account, payload).await
            }
        }
    }
}
