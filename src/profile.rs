use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::option::OptionValue;
use crate::settings::Settings;
use crate::storage::KeyValueStore;

// Storage key holding the name of the default profile
pub const DEFAULT_PROFILE_KEY: &str = "default-profile";

const PROFILE_SUFFIX: &str = ".json";

/// Stored option values, keyed by option group identity then option name.
///
/// Serialized as `{ "<group>": { "<option>": <value> } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProfileData {
    groups: BTreeMap<String, BTreeMap<String, Value>>,
}

impl ProfileData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Collect every persistable value currently set, under each group exposing it
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut data = Self::new();
        for group in settings.shape().groups() {
            for spec in group.options().iter().filter(|spec| spec.is_persisted()) {
                if let Some(value) = settings.get(spec.name()) {
                    data.insert(group.id(), spec.name(), value.to_json());
                }
            }
        }
        data
    }

    /// Parse stored bytes; top-level entries that are not objects are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let raw: serde_json::Map<String, Value> = serde_json::from_slice(bytes)?;
        let groups = raw
            .into_iter()
            .filter_map(|(group, values)| match values {
                Value::Object(values) => Some((group, values.into_iter().collect())),
                _ => None,
            })
            .collect();
        Ok(Self { groups })
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    #[must_use]
    pub fn group(&self, id: &str) -> Option<&BTreeMap<String, Value>> {
        self.groups.get(id)
    }

    #[must_use]
    pub fn value(&self, group: &str, option: &str) -> Option<&Value> {
        self.groups.get(group).and_then(|values| values.get(option))
    }

    pub fn insert(&mut self, group: &str, option: &str, value: Value) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(option.to_string(), value);
    }

    // Overlay `other` on top of this data; values from `other` win
    pub fn overlay(&mut self, other: ProfileData) {
        for (group, values) in other.groups {
            self.groups.entry(group).or_default().extend(values);
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, Value>)> {
        self.groups
            .iter()
            .map(|(group, values)| (group.as_str(), values))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(BTreeMap::is_empty)
    }
}

// A named, persisted snapshot of option values
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub name: String,
    pub data: ProfileData,
}

/// Map a profile name to a safe storage name.
///
/// Characters that are illegal in file names become `_` and trailing dots or
/// spaces are stripped.
///
/// # Errors
///
/// Returns [`Error::InvalidProfileName`] if nothing usable remains.
pub fn sanitize_profile_name(name: &str) -> Result<String> {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        return Err(Error::InvalidProfileName(name.to_string()));
    }

    // Device names stay reserved on Windows whatever the extension
    let (stem, rest) = trimmed.split_at(trimmed.find('.').unwrap_or(trimmed.len()));
    if is_reserved_stem(stem) {
        return Ok(format!("{stem}_{rest}"));
    }
    Ok(trimmed.to_string())
}

fn is_reserved_stem(stem: &str) -> bool {
    let upper = stem.trim_end().to_ascii_uppercase();
    match upper.as_str() {
        "CON" | "PRN" | "AUX" | "NUL" => true,
        _ => {
            let bytes = upper.as_bytes();
            bytes.len() == 4
                && (upper.starts_with("COM") || upper.starts_with("LPT"))
                && (b'1'..=b'9').contains(&bytes[3])
        }
    }
}

/// Named profiles on top of a key-value store, plus the default profile pointer.
///
/// The store is not locked: concurrent processes may race on read-modify-write.
#[derive(Debug)]
pub struct ProfileStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> ProfileStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store_ref(&self) -> &S {
        &self.store
    }

    fn key(name: &str) -> Result<String> {
        Ok(format!("{}{PROFILE_SUFFIX}", sanitize_profile_name(name)?))
    }

    fn read(&self, name: &str) -> Result<Option<ProfileData>> {
        match self.store.get(&Self::key(name)?)? {
            Some(bytes) => Ok(Some(ProfileData::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the name is invalid or the store cannot be read.
    pub fn exists(&self, name: &str) -> Result<bool> {
        self.store.exists(&Self::key(name)?)
    }

    /// Load one profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProfileNotFound`] if no profile is stored under `name`.
    pub fn load(&self, name: &str) -> Result<Profile> {
        let data = self
            .read(name)?
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))?;
        Ok(Profile {
            name: sanitize_profile_name(name)?,
            data,
        })
    }

    /// Stored profile names, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_suffix(PROFILE_SUFFIX).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Fill unset settings from the named profiles, earliest profile first.
    ///
    /// All profiles are loaded before anything is applied, so a missing
    /// profile leaves `settings` untouched. Values that no longer fit the
    /// option's declared type are skipped. Returns the number of slots filled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProfileNotFound`] for the first missing profile.
    pub fn apply(&self, names: &[String], settings: &mut Settings) -> Result<usize> {
        let profiles = names
            .iter()
            .map(|name| self.load(name))
            .collect::<Result<Vec<_>>>()?;

        let shape = Arc::clone(settings.shape());
        let mut filled = 0;
        for profile in &profiles {
            for group in shape.groups() {
                let Some(values) = profile.data.group(group.id()) else {
                    continue;
                };
                for spec in group.options().iter().filter(|spec| spec.is_persisted()) {
                    let Some(raw) = values.get(spec.name()) else {
                        continue;
                    };
                    if settings.is_set(spec.name()) {
                        continue;
                    }
                    match OptionValue::from_json(spec.value_type(), raw) {
                        Ok(value) => {
                            if settings.fill(spec.name(), value)? {
                                filled += 1;
                            }
                        }
                        Err(e) => warn!(
                            profile = profile.name.as_str(),
                            group = group.id(),
                            option = spec.name(),
                            "skipping stored value: {e}"
                        ),
                    }
                }
            }
            debug!(profile = profile.name.as_str(), "applied profile");
        }

        Ok(filled)
    }

    /// Persist the persistable values of `settings` under `name`.
    ///
    /// With `merge`, the new values are overlaid on the existing profile;
    /// otherwise the profile is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the store cannot be read or written.
    pub fn store(&mut self, name: &str, settings: &Settings, merge: bool) -> Result<Profile> {
        let fresh = ProfileData::from_settings(settings);
        let data = match self.read(name)? {
            Some(mut existing) if merge => {
                existing.overlay(fresh);
                existing
            }
            _ => fresh,
        };

        self.store.put(&Self::key(name)?, &data.to_json()?)?;
        info!(profile = name, merge, "stored profile");

        Ok(Profile {
            name: sanitize_profile_name(name)?,
            data,
        })
    }

    /// Make `name` the default profile; returns whether it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn select(&mut self, name: &str) -> Result<bool> {
        if !self.exists(name)? {
            return Ok(false);
        }
        let stored = sanitize_profile_name(name)?;
        self.store.put(DEFAULT_PROFILE_KEY, stored.as_bytes())?;
        Ok(true)
    }

    /// Clear the default profile; returns whether one was selected.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn unselect(&mut self) -> Result<bool> {
        self.store.delete(DEFAULT_PROFILE_KEY)
    }

    /// Delete a profile; returns whether it existed.
    ///
    /// Deleting the default profile also clears the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the store cannot be written.
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        let removed = self.store.delete(&Self::key(name)?)?;
        if removed && self.default_profile()? == Some(sanitize_profile_name(name)?) {
            self.unselect()?;
        }
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn default_profile(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .get(DEFAULT_PROFILE_KEY)?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|name| !name.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_illegal_characters() {
        assert_eq!(sanitize_profile_name("a/b\\c").unwrap(), "a_b_c");
        assert_eq!(sanitize_profile_name("prod:eu?").unwrap(), "prod_eu_");
        assert_eq!(sanitize_profile_name("work. . ").unwrap(), "work");
    }

    #[test]
    fn test_sanitize_rejects_empty_names() {
        assert!(matches!(
            sanitize_profile_name(".."),
            Err(Error::InvalidProfileName(_))
        ));
        assert!(sanitize_profile_name("   ").is_err());
    }

    #[test]
    fn test_sanitize_escapes_device_names() {
        assert_eq!(sanitize_profile_name("con").unwrap(), "con_");
        assert_eq!(sanitize_profile_name("NUL.backup").unwrap(), "NUL_.backup");
        assert_eq!(sanitize_profile_name("Com7").unwrap(), "Com7_");
        assert_eq!(sanitize_profile_name("lpt9.eu").unwrap(), "lpt9_.eu");
        assert_eq!(sanitize_profile_name("com0").unwrap(), "com0");
        assert_eq!(sanitize_profile_name("console").unwrap(), "console");
        assert_eq!(sanitize_profile_name("com10").unwrap(), "com10");
    }

    #[test]
    fn test_traversal_stays_a_single_key() {
        let key = ProfileStore::<crate::storage::MemoryStore>::key("../../etc/passwd").unwrap();
        assert!(!key.contains('/'));
        assert_eq!(key, ".._.._etc_passwd.json");
    }

    #[test]
    fn test_overlay_new_values_win() {
        let mut base = ProfileData::new();
        base.insert("server", "url", Value::from("https://a.example"));
        base.insert("credentials", "email", Value::from("a@b.com"));

        let mut update = ProfileData::new();
        update.insert("server", "url", Value::from("https://b.example"));

        base.overlay(update);
        assert_eq!(
            base.value("server", "url"),
            Some(&Value::from("https://b.example"))
        );
        assert_eq!(
            base.value("credentials", "email"),
            Some(&Value::from("a@b.com"))
        );
    }

    #[test]
    fn test_from_json_ignores_non_object_entries() {
        let data = ProfileData::from_json(br#"{"version": 2, "server": {"url": "x"}}"#).unwrap();
        assert!(data.group("version").is_none());
        assert_eq!(data.value("server", "url"), Some(&Value::from("x")));
    }
}
