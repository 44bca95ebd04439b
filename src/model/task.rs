// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recurring tasks and their per-day completion keys.
//!
//! A completion key uniquely identifies one task's completion on one
//! calendar day:
//!
//! ```
//! use focus_sync::model::{completion_key, parse_completion_key};
//!
//! let key = completion_key("task-1", "2026-03-14");
//! assert_eq!(key, "task-1|2026-03-14");
//! assert_eq!(parse_completion_key(&key), Some(("task-1", "2026-03-14")));
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatRule {
    #[default]
    Never,
    Daily,
    Weekdays,
    Weekly,
    /// Repeats on `Task::custom_weekdays`
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    /// Local time of day, "HH:MM"
    #[serde(default)]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub repeat_rule: RepeatRule,
    /// ISO weekday numbers, 1 = Monday
    #[serde(default)]
    pub custom_weekdays: BTreeSet<u8>,
    #[serde(default)]
    pub duration_estimate_minutes: Option<u32>,
    /// "YYYY-MM-DD" days skipped by the repeat rule
    #[serde(default)]
    pub excluded_dates: BTreeSet<String>,
    #[serde(default)]
    pub sort_index: i32,
    #[serde(default)]
    pub archived: bool,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            notes: String::new(),
            reminder_time: None,
            repeat_rule: RepeatRule::Never,
            custom_weekdays: BTreeSet::new(),
            duration_estimate_minutes: None,
            excluded_dates: BTreeSet::new(),
            sort_index: 0,
            archived: false,
        }
    }

    #[must_use]
    pub fn to_dto(&self, account: &AccountId) -> TaskDto {
        TaskDto {
            account_id: account.as_str().to_string(),
            id: self.id.clone(),
            title: self.title.clone(),
            notes: self.notes.clone(),
            reminder_time: self.reminder_time.clone(),
            repeat_rule: self.repeat_rule,
            custom_weekdays: self.custom_weekdays.iter().copied().collect(),
            duration_estimate_minutes: self.duration_estimate_minutes,
            excluded_dates: self.excluded_dates.iter().cloned().collect(),
            sort_index: self.sort_index,
            archived: self.archived,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Key for one task completed on one day.
#[must_use]
pub fn completion_key(task_id: &str, day: &str) -> String {
    format!("{}|{}", task_id, day)
}

/// Split a completion key into `(task_id, day)`.
#[must_use]
pub fn parse_completion_key(key: &str) -> Option<(&str, &str)> {
    let (task_id, day) = key.rsplit_once('|')?;
    if task_id.is_empty() || day.is_empty() {
        return None;
    }
    Some((task_id, day))
}

/// Local task state: task records plus the completion-key set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBook {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub completions: BTreeSet<String>,
}

impl TaskBook {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Insert or replace by id.
    pub fn upsert(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }

    /// Soft delete. Archived tasks stay so old completions still resolve.
    pub fn archive(&mut self, id: &str) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) if !task.archived => {
                task.archived = true;
                true
            }
            _ => false,
        }
    }

    /// Flip completion for `task_id` on `day`; returns the new state.
    pub fn toggle_completion(&mut self, task_id: &str, day: &str) -> bool {
        let key = completion_key(task_id, day);
        if self.completions.remove(&key) {
            false
        } else {
            self.completions.insert(key);
            true
        }
    }

    #[must_use]
    pub fn is_completed(&self, task_id: &str, day: &str) -> bool {
        self.completions.contains(&completion_key(task_id, day))
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| !t.archived)
    }

    pub fn sort(&mut self) {
        self.tasks.sort_by(|a, b| a.sort_index.cmp(&b.sort_index).then_with(|| a.id.cmp(&b.id)));
    }
}

/// Remote `tasks` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDto {
    pub account_id: String,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub repeat_rule: RepeatRule,
    #[serde(default)]
    pub custom_weekdays: Vec<u8>,
    #[serde(default)]
    pub duration_estimate_minutes: Option<u32>,
    #[serde(default)]
    pub excluded_dates: Vec<String>,
    #[serde(default)]
    pub sort_index: i32,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl TaskDto {
    #[must_use]
    pub fn into_local(self) -> Task {
        Task {
            id: self.id,
            title: self.title,
            notes: self.notes,
            reminder_time: self.reminder_time,
            repeat_rule: self.repeat_rule,
            custom_weekdays: self.custom_weekdays.into_iter().collect(),
            duration_estimate_minutes: self.duration_estimate_minutes,
            excluded_dates: self.excluded_dates.into_iter().collect(),
            sort_index: self.sort_index,
            archived: self.archived,
        }
    }
}

/// Remote `task_completions` row. Conflict key is `(account_id, completion_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionDto {
    pub account_id: String,
    pub completion_key: String,
    pub task_id: String,
    pub day: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl CompletionDto {
    /// Build from a key; `None` for malformed keys.
    #[must_use]
    pub fn from_key(account: &AccountId, key: &str) -> Option<Self> {
        let (task_id, day) = parse_completion_key(key)?;
        Some(Self {
            account_id: account.as_str().to_string(),
            completion_key: key.to_string(),
            task_id: task_id.to_string(),
            day: day.to_string(),
            created_at: None,
        })
    }
}
