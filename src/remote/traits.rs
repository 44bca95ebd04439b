// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::query::{Filter, Order};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network unreachable: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Malformed remote row in '{table}': {message}")]
    Decode { table: String, message: String },
}

impl RemoteError {
    /// Connectivity failures, as opposed to the server refusing the request.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Generic tabular remote datastore.
///
/// Rows travel as JSON objects; typed DTOs are converted at the edges with
/// [`decode_rows`] and [`encode_rows`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows matching `filter`, optionally ordered.
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&Order>,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Insert or replace rows, matching existing rows on `on_conflict` columns.
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &[&str],
    ) -> Result<(), RemoteError>;

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<(), RemoteError>;

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), RemoteError>;

    /// Merge `patch` into every row matching `filter`.
    async fn update(&self, table: &str, patch: Value, filter: &Filter) -> Result<(), RemoteError>;
}

/// Decode remote rows into DTOs.
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Result<Vec<T>, RemoteError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| RemoteError::Decode {
                table: table.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Encode DTOs into remote rows.
pub fn encode_rows<T: Serialize>(table: &str, dtos: &[T]) -> Result<Vec<Value>, RemoteError> {
    dtos.iter()
        .map(|dto| {
            serde_json::to_value(dto).map_err(|e| RemoteError::Decode {
                table: table.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}
