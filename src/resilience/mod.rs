// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable retry of failed remote writes.

pub mod operation;
pub mod queue;
pub mod retry;

pub use operation::{OperationKind, OperationStatus, QueueStats, SyncOperation, DELETED_IDS};
pub use queue::{DrainReport, OperationExecutor, SyncQueue, QUEUE_KEY};
pub use retry::BackoffSchedule;
