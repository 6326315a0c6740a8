use crate::backend::BackendError;
use language_utils::profile::{ProfileRow, ProfileRowUpdate};
use language_utils::{Language, LearnerSettings, Proficiency};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_NAME: &str = "Student";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct UserProfile {
    pub full_name: String,
    pub target_language: Language,
    pub native_language: Language,
    pub proficiency: Proficiency,
    pub xp: u64,
    pub words_learned: u64,
    pub streak: u32,
}

impl Default for UserProfile {
    fn default() -> Self {
        let settings = LearnerSettings::default();
        Self {
            full_name: DEFAULT_NAME.to_string(),
            target_language: settings.target_language,
            native_language: settings.native_language,
            proficiency: settings.proficiency,
            xp: 0,
            words_learned: 0,
            streak: 0,
        }
    }
}

impl UserProfile {
    pub fn settings(&self) -> LearnerSettings {
        LearnerSettings {
            target_language: self.target_language,
            native_language: self.native_language,
            proficiency: self.proficiency,
        }
    }

    /// Null or missing columns fall back to the defaults.
    pub fn from_row(row: ProfileRow) -> Self {
        let defaults = Self::default();
        let counter = |value: Option<i64>| value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0);
        Self {
            full_name: row
                .full_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(defaults.full_name),
            target_language: row.target_language.unwrap_or(defaults.target_language),
            native_language: row.native_language.unwrap_or(defaults.native_language),
            proficiency: row.proficiency.unwrap_or(defaults.proficiency),
            xp: counter(row.xp),
            words_learned: counter(row.words_learned),
            streak: u32::try_from(counter(row.streak)).unwrap_or(u32::MAX),
        }
    }
}

/// A partial profile. Fields left as `None` are untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, tsify::Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub target_language: Option<Language>,
    #[serde(default)]
    pub native_language: Option<Language>,
    #[serde(default)]
    pub proficiency: Option<Proficiency>,
    #[serde(default)]
    pub xp: Option<u64>,
    #[serde(default)]
    pub words_learned: Option<u64>,
    #[serde(default)]
    pub streak: Option<u32>,
}

impl From<LearnerSettings> for ProfileUpdate {
    fn from(settings: LearnerSettings) -> Self {
        Self {
            target_language: Some(settings.target_language),
            native_language: Some(settings.native_language),
            proficiency: Some(settings.proficiency),
            ..Default::default()
        }
    }
}

/// The columns a client may write back.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, tsify::Tsify,
)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Xp,
    WordsLearned,
    Streak,
    TargetLanguage,
    NativeLanguage,
    Proficiency,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProfileCommand {
    AddXp(u64),
    AddWordsLearned(u64),
    SetStreak(u32),
    SetSettings(LearnerSettings),
}

impl ProfileCommand {
    /// Increments only make sense on top of the stored values.
    pub fn is_increment(&self) -> bool {
        matches!(
            self,
            ProfileCommand::AddXp(_) | ProfileCommand::AddWordsLearned(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to save profile")]
    Persist(#[source] BackendError),
    #[error("failed to load profile")]
    Load(#[source] BackendError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No session, so the change only lives in memory.
    LocalOnly,
    Persisted,
    /// Nothing persistable changed.
    Unchanged,
}

/// Increments made before the stored profile could be read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PendingIncrements {
    xp: u64,
    words_learned: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ProfileStore {
    profile: UserProfile,
    unsynced: BTreeSet<ProfileField>,
    loaded: bool,
    pending: PendingIncrements,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn unsynced(&self) -> &BTreeSet<ProfileField> {
        &self.unsynced
    }

    /// Whether the stored profile has been read since signing in.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Turns a command into an absolute update against the current values.
    pub fn update_for(&self, command: &ProfileCommand) -> ProfileUpdate {
        match command {
            ProfileCommand::AddXp(delta) => ProfileUpdate {
                xp: Some(self.profile.xp.saturating_add(*delta)),
                ..Default::default()
            },
            ProfileCommand::AddWordsLearned(delta) => ProfileUpdate {
                words_learned: Some(self.profile.words_learned.saturating_add(*delta)),
                ..Default::default()
            },
            ProfileCommand::SetStreak(streak) => ProfileUpdate {
                streak: Some(*streak),
                ..Default::default()
            },
            ProfileCommand::SetSettings(settings) => ProfileUpdate::from(*settings),
        }
    }

    /// Merges `update` into memory and returns the persistable fields it set.
    pub fn merge(&mut self, update: &ProfileUpdate) -> Vec<ProfileField> {
        let mut fields = Vec::new();
        if let Some(name) = &update.full_name {
            self.profile.full_name = name.clone();
        }
        if let Some(language) = update.target_language {
            self.profile.target_language = language;
            fields.push(ProfileField::TargetLanguage);
        }
        if let Some(language) = update.native_language {
            self.profile.native_language = language;
            fields.push(ProfileField::NativeLanguage);
        }
        if let Some(proficiency) = update.proficiency {
            self.profile.proficiency = proficiency;
            fields.push(ProfileField::Proficiency);
        }
        if let Some(xp) = update.xp {
            self.profile.xp = xp;
            fields.push(ProfileField::Xp);
        }
        if let Some(words) = update.words_learned {
            self.profile.words_learned = words;
            fields.push(ProfileField::WordsLearned);
        }
        if let Some(streak) = update.streak {
            self.profile.streak = streak;
            fields.push(ProfileField::Streak);
        }
        fields
    }

    /// The keyed write for `fields`, carrying their current in-memory values.
    pub fn row_update(&self, fields: &[ProfileField], updated_at: String) -> ProfileRowUpdate {
        let column = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
        let mut update = ProfileRowUpdate {
            updated_at,
            ..Default::default()
        };
        for field in fields {
            match field {
                ProfileField::Xp => update.xp = Some(column(self.profile.xp)),
                ProfileField::WordsLearned => {
                    update.words_learned = Some(column(self.profile.words_learned))
                }
                ProfileField::Streak => update.streak = Some(i64::from(self.profile.streak)),
                ProfileField::TargetLanguage => {
                    update.target_language = Some(self.profile.target_language)
                }
                ProfileField::NativeLanguage => {
                    update.native_language = Some(self.profile.native_language)
                }
                ProfileField::Proficiency => update.proficiency = Some(self.profile.proficiency),
            }
        }
        update
    }

    pub fn mark_unsynced(&mut self, fields: &[ProfileField]) {
        self.unsynced.extend(fields.iter().copied());
    }

    /// Clears the flags of fields whose current value is the one `sent` carried.
    /// A field changed again since then stays flagged.
    pub fn mark_synced(&mut self, fields: &[ProfileField], sent: &ProfileRowUpdate) {
        for field in fields {
            let current = self.row_update(&[*field], String::new());
            if current == column_of(sent, *field) {
                self.unsynced.remove(field);
            }
        }
    }

    pub fn unsynced_fields(&self) -> Vec<ProfileField> {
        self.unsynced.iter().copied().collect()
    }

    /// Applies an increment in memory only, to be replayed once the stored
    /// profile is loaded. Writing it now would overwrite the stored counter.
    pub fn defer(&mut self, command: &ProfileCommand) {
        let update = self.update_for(command);
        let fields = self.merge(&update);
        match command {
            ProfileCommand::AddXp(delta) => {
                self.pending.xp = self.pending.xp.saturating_add(*delta)
            }
            ProfileCommand::AddWordsLearned(delta) => {
                self.pending.words_learned = self.pending.words_learned.saturating_add(*delta)
            }
            ProfileCommand::SetStreak(_) | ProfileCommand::SetSettings(_) => {}
        }
        self.mark_unsynced(&fields);
    }

    /// Adopts the stored profile, e.g. after signing in. Deferred increments
    /// are added on top and left flagged for the next write.
    pub fn replace(&mut self, row: ProfileRow) {
        self.profile = UserProfile::from_row(row);
        self.unsynced.clear();
        self.loaded = true;

        let pending = std::mem::take(&mut self.pending);
        if pending.xp > 0 {
            self.profile.xp = self.profile.xp.saturating_add(pending.xp);
            self.unsynced.insert(ProfileField::Xp);
        }
        if pending.words_learned > 0 {
            self.profile.words_learned = self
                .profile
                .words_learned
                .saturating_add(pending.words_learned);
            self.unsynced.insert(ProfileField::WordsLearned);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn column_of(row: &ProfileRowUpdate, field: ProfileField) -> ProfileRowUpdate {
    let mut only = ProfileRowUpdate::default();
    match field {
        ProfileField::Xp => only.xp = row.xp,
        ProfileField::WordsLearned => only.words_learned = row.words_learned,
        ProfileField::Streak => only.streak = row.streak,
        ProfileField::TargetLanguage => only.target_language = row.target_language,
        ProfileField::NativeLanguage => only.native_language = row.native_language,
        ProfileField::Proficiency => only.proficiency = row.proficiency,
    }
    only
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_before_any_fetch() {
        let store = ProfileStore::new();
        let profile = store.profile();
        assert_eq!(profile.full_name, "Student");
        assert_eq!(profile.target_language, Language::English);
        assert_eq!(profile.native_language, Language::Khmer);
        assert_eq!(profile.proficiency, Proficiency::Beginner);
        assert_eq!((profile.xp, profile.words_learned, profile.streak), (0, 0, 0));
    }

    #[test]
    fn merge_only_reports_persistable_fields() {
        let mut store = ProfileStore::new();
        let fields = store.merge(&ProfileUpdate {
            full_name: Some("Dara".to_string()),
            xp: Some(40),
            ..Default::default()
        });
        assert_eq!(fields, vec![ProfileField::Xp]);
        assert_eq!(store.profile().full_name, "Dara");
        assert_eq!(store.profile().xp, 40);
    }

    #[test]
    fn sequential_deltas_are_not_lost() {
        let mut store = ProfileStore::new();
        for delta in [30, 5, 5] {
            let update = store.update_for(&ProfileCommand::AddXp(delta));
            store.merge(&update);
        }
        assert_eq!(store.profile().xp, 40);
    }

    #[test]
    fn counters_saturate() {
        let mut store = ProfileStore::new();
        store.merge(&ProfileUpdate {
            words_learned: Some(u64::MAX - 1),
            ..Default::default()
        });
        let update = store.update_for(&ProfileCommand::AddWordsLearned(10));
        assert_eq!(update.words_learned, Some(u64::MAX));
    }

    #[test]
    fn settings_command_touches_the_three_settings() {
        let store = ProfileStore::new();
        let settings = LearnerSettings {
            target_language: Language::Japanese,
            native_language: Language::English,
            proficiency: Proficiency::Intermediate,
        };
        let update = store.update_for(&ProfileCommand::SetSettings(settings));
        assert_eq!(update.target_language, Some(Language::Japanese));
        assert_eq!(update.xp, None);
    }

    #[test]
    fn row_update_carries_current_values_and_timestamp() {
        let mut store = ProfileStore::new();
        store.merge(&ProfileUpdate {
            xp: Some(70),
            streak: Some(3),
            ..Default::default()
        });
        let row = store.row_update(
            &[ProfileField::Xp, ProfileField::Streak],
            "2026-10-16T00:00:00Z".to_string(),
        );
        assert_eq!(row.xp, Some(70));
        assert_eq!(row.streak, Some(3));
        assert_eq!(row.words_learned, None);
        assert_eq!(row.updated_at, "2026-10-16T00:00:00Z");
    }

    #[test]
    fn unsynced_flags_accumulate_and_clear() {
        let mut store = ProfileStore::new();
        store.mark_unsynced(&[ProfileField::Xp]);
        store.mark_unsynced(&[ProfileField::Xp, ProfileField::Streak]);
        assert_eq!(
            store.unsynced_fields(),
            vec![ProfileField::Xp, ProfileField::Streak]
        );
        let sent = store.row_update(&[ProfileField::Xp], String::new());
        store.mark_synced(&[ProfileField::Xp], &sent);
        assert_eq!(store.unsynced_fields(), vec![ProfileField::Streak]);
    }

    #[test]
    fn an_outdated_write_does_not_clear_a_newer_flag() {
        let mut store = ProfileStore::new();
        store.merge(&ProfileUpdate {
            xp: Some(40),
            ..Default::default()
        });
        let first = store.row_update(&[ProfileField::Xp], "t1".to_string());
        store.merge(&ProfileUpdate {
            xp: Some(45),
            ..Default::default()
        });
        store.mark_unsynced(&[ProfileField::Xp]);
        // the older write lands after the newer one failed
        store.mark_synced(&[ProfileField::Xp], &first);
        assert_eq!(store.unsynced_fields(), vec![ProfileField::Xp]);
    }

    #[test]
    fn fetched_rows_fill_gaps_with_defaults() {
        let mut store = ProfileStore::new();
        store.mark_unsynced(&[ProfileField::Xp]);
        store.replace(ProfileRow {
            id: "u1".to_string(),
            full_name: Some("  ".to_string()),
            target_language: Some(Language::Spanish),
            xp: Some(-5),
            words_learned: Some(12),
            ..Default::default()
        });
        let profile = store.profile();
        assert_eq!(profile.full_name, "Student");
        assert_eq!(profile.target_language, Language::Spanish);
        assert_eq!(profile.native_language, Language::Khmer);
        assert_eq!(profile.xp, 0);
        assert_eq!(profile.words_learned, 12);
        assert!(store.unsynced().is_empty());
        assert!(store.is_loaded());
    }

    #[test]
    fn deferred_increments_land_on_top_of_the_stored_row() {
        let mut store = ProfileStore::new();
        assert!(!store.is_loaded());
        store.defer(&ProfileCommand::AddWordsLearned(2));
        store.defer(&ProfileCommand::AddWordsLearned(3));
        assert_eq!(store.profile().words_learned, 5);
        assert_eq!(store.unsynced_fields(), vec![ProfileField::WordsLearned]);

        store.replace(ProfileRow {
            id: "u1".to_string(),
            xp: Some(300),
            words_learned: Some(80),
            ..Default::default()
        });
        assert_eq!(store.profile().words_learned, 85);
        assert_eq!(store.profile().xp, 300);
        assert_eq!(store.unsynced_fields(), vec![ProfileField::WordsLearned]);

        // replayed once only
        store.replace(ProfileRow {
            id: "u1".to_string(),
            words_learned: Some(85),
            ..Default::default()
        });
        assert_eq!(store.profile().words_learned, 85);
        assert!(store.unsynced().is_empty());
    }

    #[test]
    fn only_counters_are_increments() {
        assert!(ProfileCommand::AddXp(5).is_increment());
        assert!(ProfileCommand::AddWordsLearned(1).is_increment());
        assert!(!ProfileCommand::SetStreak(4).is_increment());
        assert!(!ProfileCommand::SetSettings(LearnerSettings::default()).is_increment());
    }
}
