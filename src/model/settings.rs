// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! User preferences.
//!
//! Locally a flat bag of typed fields; remotely a single row per account
//! whose fields are all optional so a partial row never clobbers unrelated
//! local values.
//!
//! ```
//! use focus_sync::model::{Settings, SettingsDto};
//! use focus_sync::AccountId;
//!
//! let mut local = Settings::default();
//! let remote = SettingsDto {
//!     theme: Some("midnight".into()),
//!     ..SettingsDto::empty(&AccountId::new("u1"))
//! };
//! let report = remote.merge_into(&mut local, |_| false);
//! assert_eq!(local.theme, "midnight");
//! assert_eq!(report.applied, vec!["theme"]);
//! assert!(local.sound_enabled); // untouched
//! ```

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sound_enabled: bool,
    pub haptics_enabled: bool,
    pub notifications_enabled: bool,
    pub default_focus_minutes: u32,
    pub default_break_minutes: u32,
    pub daily_goal_minutes: u32,
    pub theme: String,
    pub week_starts_on_monday: bool,
    pub contact_email: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            haptics_enabled: true,
            notifications_enabled: true,
            default_focus_minutes: 25,
            default_break_minutes: 5,
            daily_goal_minutes: 120,
            theme: "system".to_string(),
            week_starts_on_monday: true,
            contact_email: None,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn to_dto(&self, account: &AccountId) -> SettingsDto {
        SettingsDto {
            account_id: account.as_str().to_string(),
            sound_enabled: Some(self.sound_enabled),
            haptics_enabled: Some(self.haptics_enabled),
            notifications_enabled: Some(self.notifications_enabled),
            default_focus_minutes: Some(self.default_focus_minutes),
            default_break_minutes: Some(self.default_break_minutes),
            daily_goal_minutes: Some(self.daily_goal_minutes),
            theme: Some(self.theme.clone()),
            week_starts_on_monday: Some(self.week_starts_on_monday),
            contact_email: self.contact_email.clone(),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Remote `user_settings` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDto {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haptics_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_focus_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_break_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_goal_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_starts_on_monday: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Which fields a merge took from remote and which it left local.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub applied: Vec<&'static str>,
    pub kept_local: Vec<&'static str>,
}

impl MergeReport {
    #[must_use]
    pub fn local_ahead(&self) -> bool {
        !self.kept_local.is_empty()
    }
}

fn merge_field<T: PartialEq>(
    name: &'static str,
    remote: Option<T>,
    local: &mut T,
    keep_local: &dyn Fn(&str) -> bool,
    report: &mut MergeReport,
) {
    let Some(value) = remote else { return };
    if *local == value {
        return;
    }
    if keep_local(name) {
        report.kept_local.push(name);
        return;
    }
    *local = value;
    report.applied.push(name);
}

impl SettingsDto {
    /// A row with no preference fields set.
    #[must_use]
    pub fn empty(account: &AccountId) -> Self {
        Self {
            account_id: account.as_str().to_string(),
            sound_enabled: None,
            haptics_enabled: None,
            notifications_enabled: None,
            default_focus_minutes: None,
            default_break_minutes: None,
            daily_goal_minutes: None,
            theme: None,
            week_starts_on_monday: None,
            contact_email: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Merge present fields into `local` one by one.
    ///
    /// Absent fields leave the local value untouched. `keep_local(field)`
    /// returning true preserves a differing local value (it was edited
    /// locally after this row was written).
    pub fn merge_into(&self, local: &mut Settings, keep_local: impl Fn(&str) -> bool) -> MergeReport {
        let keep: &dyn Fn(&str) -> bool = &keep_local;
        let mut report = MergeReport::default();
        merge_field("sound_enabled", self.sound_enabled, &mut local.sound_enabled, keep, &mut report);
        merge_field("haptics_enabled", self.haptics_enabled, &mut local.haptics_enabled, keep, &mut report);
        merge_field(
            "notifications_enabled",
            self.notifications_enabled,
            &mut local.notifications_enabled,
            keep,
            &mut report,
        );
        merge_field(
            "default_focus_minutes",
            self.default_focus_minutes,
            &mut local.default_focus_minutes,
            keep,
            &mut report,
        );
        merge_field(
            "default_break_minutes",
            self.default_break_minutes,
            &mut local.default_break_minutes,
            keep,
            &mut report,
        );
        merge_field("daily_goal_minutes", self.daily_goal_minutes, &mut local.daily_goal_minutes, keep, &mut report);
        merge_field("theme", self.theme.clone(), &mut local.theme, keep, &mut report);
        merge_field(
            "week_starts_on_monday",
            self.week_starts_on_monday,
            &mut local.week_starts_on_monday,
            keep,
            &mut report,
        );
        if let Some(email) = &self.contact_email {
            merge_field("contact_email", Some(Some(email.clone())), &mut local.contact_email, keep, &mut report);
        }
        report
    }
}
