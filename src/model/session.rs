// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Completed work sessions. Sessions are created, never edited.

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Epoch millis
    pub started_at: i64,
    pub duration_seconds: u32,
    #[serde(default)]
    pub name: Option<String>,
}

impl Session {
    pub fn new(started_at: i64, duration_seconds: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at,
            duration_seconds,
            name: None,
        }
    }

    #[must_use]
    pub fn to_dto(&self, account: &AccountId) -> SessionDto {
        SessionDto {
            account_id: account.as_str().to_string(),
            id: self.id.clone(),
            started_at: self.started_at,
            duration_seconds: self.duration_seconds,
            name: self.name.clone(),
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLog {
    pub sessions: Vec<Session>,
}

impl SessionLog {
    pub fn record(&mut self, session: Session) {
        if !self.contains(&session.id) {
            self.sessions.push(session);
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    #[must_use]
    pub fn total_focus_seconds(&self) -> u64 {
        self.sessions.iter().map(|s| u64::from(s.duration_seconds)).sum()
    }

    /// Keep chronological order after a merge.
    pub fn sort(&mut self) {
        self.sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Remote `sessions` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDto {
    pub account_id: String,
    pub id: String,
    pub started_at: i64,
    pub duration_seconds: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl SessionDto {
    #[must_use]
    pub fn into_local(self) -> Session {
        Session {
            id: self.id,
            started_at: self.started_at,
            duration_seconds: self.duration_seconds,
            name: self.name,
        }
    }
}

/// Remote `user_stats` row, derived from the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatsDto {
    pub account_id: String,
    pub total_sessions: u64,
    pub total_focus_seconds: u64,
    /// Not computed on device yet; always 0
    pub best_streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl UserStatsDto {
    #[must_use]
    pub fn from_log(account: &AccountId, log: &SessionLog) -> Self {
        Self {
            account_id: account.as_str().to_string(),
            total_sessions: log.sessions.len() as u64,
            total_focus_seconds: log.total_focus_seconds(),
            best_streak: 0,
            updated_at: None,
        }
    }
}
