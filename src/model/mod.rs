// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain records and their remote-shaped counterparts (DTOs).
//!
//! Local ↔ DTO translation is total and lossless for every field except the
//! server-assigned `created_at` / `updated_at` timestamps.

pub mod settings;
pub mod preset;
pub mod session;
pub mod task;

pub use settings::{MergeReport, Settings, SettingsDto};
pub use preset::{Preset, PresetDto, PresetLibrary};
pub use session::{Session, SessionDto, SessionLog, UserStatsDto};
pub use task::{completion_key, parse_completion_key, CompletionDto, RepeatRule, Task, TaskBook, TaskDto};

use serde::{Deserialize, Serialize};

/// One of the four independently synchronized data categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Settings,
    Presets,
    Sessions,
    Tasks,
}

impl Domain {
    /// Initial-sync order: settings affect rendering of everything else and
    /// presets are referenced when displaying sessions.
    pub const ALL: [Domain; 4] = [Domain::Settings, Domain::Presets, Domain::Sessions, Domain::Tasks];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Presets => "presets",
            Self::Sessions => "sessions",
            Self::Tasks => "tasks",
        }
    }

    /// Domains where only the newest pending write matters.
    #[must_use]
    pub fn is_latest_wins(&self) -> bool {
        matches!(self, Self::Settings | Self::Presets)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
