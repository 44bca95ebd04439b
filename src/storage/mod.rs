// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local key/value storage boundary.

pub mod traits;
pub mod memory;

pub use traits::{LocalStore, StorageError};
pub use memory::InMemoryLocalStore;
