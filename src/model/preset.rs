// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reusable session presets.

use serde::{Deserialize, Serialize};

use crate::identity::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub duration_seconds: u32,
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub theme_override: Option<String>,
    /// Shipped with the app rather than created by the user
    #[serde(default)]
    pub is_default: bool,
}

impl Preset {
    /// A user-created preset with a fresh id.
    pub fn custom(name: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            duration_seconds,
            sound: None,
            theme_override: None,
            is_default: false,
        }
    }

    fn system(id: &str, name: &str, minutes: u32, sound: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            duration_seconds: minutes * 60,
            sound: Some(sound.to_string()),
            theme_override: None,
            is_default: true,
        }
    }

    /// Presets every install starts with. Ids are stable across devices.
    #[must_use]
    pub fn system_defaults() -> Vec<Preset> {
        vec![
            Self::system("default-focus", "Focus", 25, "chime"),
            Self::system("default-short-break", "Short Break", 5, "bell"),
            Self::system("default-long-break", "Long Break", 15, "bell"),
        ]
    }

    #[must_use]
    pub fn to_dto(&self, account: &AccountId) -> PresetDto {
        PresetDto {
            account_id: account.as_str().to_string(),
            id: self.id.clone(),
            name: self.name.clone(),
            duration_seconds: self.duration_seconds,
            sound: self.sound.clone(),
            theme_override: self.theme_override.clone(),
            is_default: self.is_default,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Local preset collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetLibrary {
    pub presets: Vec<Preset>,
}

impl Default for PresetLibrary {
    fn default() -> Self {
        Self { presets: Preset::system_defaults() }
    }
}

impl PresetLibrary {
    /// True when at least one preset was created by the user.
    #[must_use]
    pub fn has_custom(&self) -> bool {
        self.presets.iter().any(|p| !p.is_default)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.id == id)
    }

    /// Insert or replace by id.
    pub fn upsert(&mut self, preset: Preset) {
        match self.presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.presets.len();
        self.presets.retain(|p| p.id != id);
        self.presets.len() != before
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.presets.iter().map(|p| p.id.as_str())
    }
}

/// Remote `presets` row. Conflict key is `(account_id, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetDto {
    pub account_id: String,
    pub id: String,
    pub name: String,
    pub duration_seconds: u32,
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default)]
    pub theme_override: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl PresetDto {
    #[must_use]
    pub fn into_local(self) -> Preset {
        Preset {
            id: self.id,
            name: self.name,
            duration_seconds: self.duration_seconds,
            sound: self.sound,
            theme_override: self.theme_override,
            is_default: self.is_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_library_has_no_custom() {
        let library = PresetLibrary::default();
        assert_eq!(library.presets.len(), 3);
        assert!(!library.has_custom());
    }

    #[test]
    fn test_custom_preset_detected() {
        let mut library = PresetLibrary::default();
        library.upsert(Preset::custom("Deep Work", 50 * 60));
        assert!(library.has_custom());
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mut library = PresetLibrary::default();
        let mut focus = library.get("default-focus").cloned().unwrap();
        focus.duration_seconds = 30 * 60;
        library.upsert(focus);
        assert_eq!(library.presets.len(), 3);
        assert_eq!(library.get("default-focus").unwrap().duration_seconds, 1800);
    }

    #[test]
    fn test_remove() {
        let mut library = PresetLibrary::default();
        assert!(library.remove("default-long-break"));
        assert!(!library.remove("default-long-break"));
        assert_eq!(library.presets.len(), 2);
    }

    #[test]
    fn test_dto_translation_is_lossless() {
        let preset = Preset {
            theme_override: Some("forest".into()),
            ..Preset::custom("Reading", 900)
        };
        let back = preset.to_dto(&AccountId::new("u1")).into_local();
        assert_eq!(back, preset);
    }
}
