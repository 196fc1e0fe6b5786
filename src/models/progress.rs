// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Learning-progress document and its additive migration.
//!
//! The document is stored as plain JSON (camelCase keys) in both backends.
//! There is no version field: older documents are upgraded on load by filling
//! in whatever is missing, and fields we do not know about are carried along.

use crate::time_utils::days_between;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::str::FromStr;

/// XP granted the first time a word is learned.
pub const FIRST_LEARN_XP: u64 = 5;

/// XP needed per level.
pub const XP_PER_LEVEL: u64 = 100;

/// Activity kinds every document starts with.
pub const DEFAULT_COMPLETION_KINDS: [&str; 5] =
    ["flashcards", "quiz", "matching", "review", "gameCheeseEaten"];

/// Language used for narration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationMode {
    #[default]
    It,
    Fr,
    En,
}

impl FromStr for NarrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "it" => Ok(Self::It),
            "fr" => Ok(Self::Fr),
            "en" => Ok(Self::En),
            other => Err(format!("unknown narration mode: {other}")),
        }
    }
}

/// UI colour theme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    Dark,
    #[default]
    System,
}

impl FromStr for ThemeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

/// User preferences stored with the progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub narration_mode: NarrationMode,
    #[serde(default)]
    pub theme: ThemeMode,
    /// Preferred mode per activity (e.g. `quiz` → `typing`)
    #[serde(default)]
    pub activity_modes: BTreeMap<String, String>,
    /// Settings written by features this crate does not model
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One user's learning state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDocument {
    pub created_at: NaiveDate,
    pub last_active: NaiveDate,
    /// Consecutive active days, never below 1
    pub streak: u32,
    pub xp: u64,
    /// Word → times learned
    pub words_learned: BTreeMap<String, u32>,
    /// Word → times missed
    pub errors: BTreeMap<String, u32>,
    /// Word → date it was last reviewed
    pub reviews: BTreeMap<String, NaiveDate>,
    /// Activity kind → times completed
    pub completions: BTreeMap<String, u64>,
    pub settings: Settings,
    /// Top-level fields written by peripheral features
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressDocument {
    /// Fresh document for a user first seen on `today`.
    pub fn new(today: NaiveDate) -> Self {
        Self {
            created_at: today,
            last_active: today,
            streak: 1,
            xp: 0,
            words_learned: BTreeMap::new(),
            errors: BTreeMap::new(),
            reviews: BTreeMap::new(),
            completions: default_completions(),
            settings: Settings::default(),
            extra: Map::new(),
        }
    }

    /// Upgrade a stored document to the current shape.
    ///
    /// Missing fields, and fields whose stored value no longer fits the
    /// current type, take their default. Returns the document and whether
    /// anything had to be repaired.
    pub fn migrate(raw: Value, today: NaiveDate) -> (Self, bool) {
        let Value::Object(mut obj) = raw else {
            tracing::warn!("Stored progress is not an object, starting over");
            return (Self::new(today), true);
        };

        let mut changed = false;
        let defaults = Self::new(today);

        let created_at = take_field(&mut obj, "createdAt", &mut changed).unwrap_or(today);
        let last_active = take_field(&mut obj, "lastActive", &mut changed).unwrap_or(today);
        let mut streak: u32 = take_field(&mut obj, "streak", &mut changed).unwrap_or(1);
        if streak == 0 {
            streak = 1;
            changed = true;
        }
        let xp = take_field(&mut obj, "xp", &mut changed).unwrap_or(0);

        let words_learned: BTreeMap<String, u32> =
            take_map(&mut obj, "wordsLearned", repair_word_count, &mut changed);
        let errors: BTreeMap<String, u32> =
            take_map(&mut obj, "errors", repair_word_count, &mut changed);
        let reviews: BTreeMap<String, NaiveDate> =
            take_map(&mut obj, "reviews", |_| None, &mut changed);
        let mut completions: BTreeMap<String, u64> =
            take_map(&mut obj, "completions", repair_count, &mut changed);
        for (kind, zero) in defaults.completions {
            if !completions.contains_key(&kind) {
                completions.insert(kind, zero);
                changed = true;
            }
        }

        let settings = match obj.remove("settings") {
            Some(Value::Object(settings)) => migrate_settings(settings, &mut changed),
            _ => {
                changed = true;
                Settings::default()
            }
        };

        let doc = Self {
            created_at,
            last_active,
            streak,
            xp,
            words_learned,
            errors,
            reviews,
            completions,
            settings,
            extra: obj,
        };
        (doc, changed)
    }

    /// Move `last_active` to `today`, extending or resetting the streak.
    ///
    /// The streak grows by one when exactly one day passed and restarts at 1
    /// after a longer gap. Same-day calls and clocks that went backwards leave
    /// the document untouched. Returns whether anything changed.
    pub fn touch(&mut self, today: NaiveDate) -> bool {
        match days_between(self.last_active, today) {
            0 => false,
            1 => {
                self.streak = self.streak.saturating_add(1);
                self.last_active = today;
                true
            }
            gap if gap > 1 => {
                self.streak = 1;
                self.last_active = today;
                true
            }
            _ => false,
        }
    }

    // ─── Mutations ───────────────────────────────────────────────

    pub fn award_xp(&mut self, amount: u64, today: NaiveDate) {
        self.xp = self.xp.saturating_add(amount);
        self.touch(today);
    }

    pub fn increment_completion(&mut self, kind: &str, by: u64, today: NaiveDate) {
        if kind.is_empty() {
            tracing::warn!("Ignoring completion without activity kind");
            return;
        }
        let count = self.completions.entry(kind.to_string()).or_insert(0);
        *count = count.saturating_add(by);
        self.touch(today);
    }

    /// Count a learned word. The first time also grants [`FIRST_LEARN_XP`].
    ///
    /// Returns true when the word was new.
    pub fn mark_learned(&mut self, word: &str, today: NaiveDate) -> bool {
        if word.is_empty() {
            tracing::warn!("Ignoring empty learned word");
            return false;
        }
        let count = self.words_learned.entry(word.to_string()).or_insert(0);
        let first_time = *count == 0;
        *count = count.saturating_add(1);
        if first_time {
            self.xp = self.xp.saturating_add(FIRST_LEARN_XP);
        }
        self.touch(today);
        first_time
    }

    pub fn mark_error(&mut self, word: &str, today: NaiveDate) {
        if word.is_empty() {
            tracing::warn!("Ignoring empty missed word");
            return;
        }
        let count = self.errors.entry(word.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        self.touch(today);
    }

    pub fn record_review(&mut self, word: &str, today: NaiveDate) {
        if word.is_empty() {
            return;
        }
        self.reviews.insert(word.to_string(), today);
        self.touch(today);
    }

    pub fn set_narration_mode(&mut self, mode: NarrationMode) {
        self.settings.narration_mode = mode;
    }

    pub fn set_theme_mode(&mut self, theme: ThemeMode) {
        self.settings.theme = theme;
    }

    pub fn set_activity_mode(&mut self, activity: &str, mode: &str) {
        self.settings
            .activity_modes
            .insert(activity.to_string(), mode.to_string());
    }

    /// Forget everything recorded for the given pack's words.
    pub fn reset_pack_progress<S: AsRef<str>>(&mut self, words: &[S]) {
        for word in words {
            let word = word.as_ref();
            self.words_learned.remove(word);
            self.errors.remove(word);
            self.reviews.remove(word);
        }
    }

    // ─── Queries ─────────────────────────────────────────────────

    pub fn level(&self) -> u64 {
        self.xp / XP_PER_LEVEL + 1
    }

    pub fn xp_in_level(&self) -> u64 {
        self.xp % XP_PER_LEVEL
    }

    pub fn words_learned_count(&self) -> usize {
        self.words_learned.len()
    }

    /// Sort words hardest first: most misses relative to times learned.
    ///
    /// Ties keep their input order.
    pub fn order_by_difficulty<S: AsRef<str>>(&self, mut words: Vec<S>) -> Vec<S> {
        words.sort_by_key(|w| {
            let w = w.as_ref();
            let misses = i64::from(self.errors.get(w).copied().unwrap_or(0));
            let learned = i64::from(self.words_learned.get(w).copied().unwrap_or(0));
            Reverse(misses - learned)
        });
        words
    }
}

fn default_completions() -> BTreeMap<String, u64> {
    DEFAULT_COMPLETION_KINDS
        .iter()
        .map(|k| (k.to_string(), 0))
        .collect()
}

/// Remove `key` from `obj` and decode it, flagging a repair when it is
/// missing or has the wrong type.
fn take_field<T: DeserializeOwned>(
    obj: &mut Map<String, Value>,
    key: &str,
    changed: &mut bool,
) -> Option<T> {
    let Some(value) = obj.remove(key) else {
        *changed = true;
        return None;
    };
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(field = key, error = %e, "Replacing malformed progress field");
            *changed = true;
            None
        }
    }
}

/// Remove the map `key` from `obj` and decode it entry by entry.
///
/// Entries that do not decode are passed to `repair`; those it cannot fix
/// are dropped, as are entries with an empty key. The rest of the map is
/// kept as stored.
fn take_map<V: DeserializeOwned>(
    obj: &mut Map<String, Value>,
    key: &str,
    repair: impl Fn(&Value) -> Option<V>,
    changed: &mut bool,
) -> BTreeMap<String, V> {
    let entries = match obj.remove(key) {
        Some(Value::Object(entries)) => entries,
        Some(other) => {
            tracing::debug!(field = key, found = %other, "Replacing malformed progress map");
            *changed = true;
            return BTreeMap::new();
        }
        None => {
            *changed = true;
            return BTreeMap::new();
        }
    };

    let mut map = BTreeMap::new();
    for (entry, value) in entries {
        if entry.is_empty() {
            *changed = true;
            continue;
        }
        let decoded = match serde_json::from_value::<V>(value.clone()) {
            Ok(v) => Some(v),
            Err(_) => {
                *changed = true;
                let repaired = repair(&value);
                if repaired.is_none() {
                    tracing::debug!(field = key, entry = %entry, "Dropping malformed progress entry");
                }
                repaired
            }
        };
        if let Some(v) = decoded {
            map.insert(entry, v);
        }
    }
    map
}

/// Non-negative count stored as a fraction or a string, rounded.
fn repair_count(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    // Float-to-int casts saturate.
    (n.is_finite() && n >= 0.0).then(|| n.round() as u64)
}

fn repair_word_count(value: &Value) -> Option<u32> {
    repair_count(value).map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn migrate_settings(mut obj: Map<String, Value>, changed: &mut bool) -> Settings {
    Settings {
        narration_mode: take_field(&mut obj, "narrationMode", changed).unwrap_or_default(),
        theme: take_field(&mut obj, "theme", changed).unwrap_or_default(),
        activity_modes: take_map(&mut obj, "activityModes", |_| None, changed),
        extra: obj,
    }
}
