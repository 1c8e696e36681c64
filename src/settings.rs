use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use clap::ArgMatches;
use url::Url;
use uuid::Uuid;

use crate::composer::SettingsShape;
use crate::error::{Error, Result};
use crate::option::{OptionSpec, OptionValue, ValueType};

/// The per-invocation bag of option values for one command.
///
/// Every slot of the shape is either set or unset. Modules may additionally
/// attach arbitrary typed handles (a live session, a client) that are not
/// option values.
pub struct Settings {
    shape: Arc<SettingsShape>,
    values: HashMap<String, OptionValue>,
    attachments: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("values", &self.values)
            .field("attachments", &self.attachments.len())
            .finish_non_exhaustive()
    }
}

impl Settings {
    // Every slot starts out unset
    #[must_use]
    pub fn new(shape: Arc<SettingsShape>) -> Self {
        Self {
            shape,
            values: HashMap::new(),
            attachments: HashMap::new(),
        }
    }

    /// Fill a settings instance from parsed arguments.
    ///
    /// Only values actually present on the command line are set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if an argument does not parse as its declared type.
    pub fn from_matches(shape: Arc<SettingsShape>, matches: &ArgMatches) -> Result<Self> {
        let mut settings = Self::new(shape);
        let specs: Vec<OptionSpec> = settings
            .shape
            .options()
            .filter(|spec| !spec.is_hidden())
            .cloned()
            .collect();

        for spec in specs {
            let raw: Vec<String> = match matches.try_get_many::<String>(spec.name()) {
                Ok(Some(values)) => values.cloned().collect(),
                _ => continue,
            };
            if raw.is_empty() {
                continue;
            }
            let value = spec.parse_values(&raw)?;
            settings.values.insert(spec.name().to_string(), value);
        }

        Ok(settings)
    }

    #[must_use]
    pub fn shape(&self) -> &Arc<SettingsShape> {
        &self.shape
    }

    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Set a slot, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is not part of the shape or the value has the wrong type.
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<()> {
        self.check(name, value.value_type())?;
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Set a slot only if it is still unset; returns whether it was filled.
    ///
    /// # Errors
    ///
    /// Returns an error if the option is not part of the shape or the value has the wrong type.
    pub fn fill(&mut self, name: &str, value: OptionValue) -> Result<bool> {
        self.check(name, value.value_type())?;
        if self.is_set(name) {
            return Ok(false);
        }
        self.values.insert(name.to_string(), value);
        Ok(true)
    }

    pub fn unset(&mut self, name: &str) -> Option<OptionValue> {
        self.values.remove(name)
    }

    // Fill unset slots from declared defaults, returning how many were filled
    pub fn apply_defaults(&mut self) -> usize {
        let defaults: Vec<(String, OptionValue)> = self
            .shape
            .options()
            .filter(|spec| !self.values.contains_key(spec.name()))
            .filter_map(|spec| spec.default().map(|value| (spec.name().to_string(), value.clone())))
            .collect();

        let filled = defaults.len();
        self.values.extend(defaults);
        filled
    }

    /// Check that every required, non-derived option holds a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequired`] naming the first missing option.
    pub fn check_required(&self) -> Result<()> {
        match self
            .shape
            .options()
            .find(|spec| spec.is_required() && !spec.is_hidden() && !self.is_set(spec.name()))
        {
            Some(spec) => Err(Error::MissingRequired(spec.name().to_string())),
            None => Ok(()),
        }
    }

    fn check(&self, name: &str, found: ValueType) -> Result<()> {
        let slot = self
            .shape
            .slot(name)
            .ok_or_else(|| Error::UndeclaredOption(name.to_string()))?;
        let expected = slot.spec().value_type();
        if expected == found {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                option: name.to_string(),
                expected,
                found,
            })
        }
    }

    fn typed(&self, name: &str, expected: ValueType) -> Result<Option<&OptionValue>> {
        self.check(name, expected)?;
        Ok(self.values.get(name))
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared or not a string option.
    pub fn string(&self, name: &str) -> Result<Option<&str>> {
        Ok(match self.typed(name, ValueType::String)? {
            Some(OptionValue::String(value)) => Some(value.as_str()),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared or not an integer option.
    pub fn integer(&self, name: &str) -> Result<Option<i64>> {
        Ok(match self.typed(name, ValueType::Integer)? {
            Some(OptionValue::Integer(value)) => Some(*value),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared or not a boolean option.
    pub fn boolean(&self, name: &str) -> Result<Option<bool>> {
        Ok(match self.typed(name, ValueType::Boolean)? {
            Some(OptionValue::Boolean(value)) => Some(*value),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared or not a uuid option.
    pub fn uuid(&self, name: &str) -> Result<Option<Uuid>> {
        Ok(match self.typed(name, ValueType::Uuid)? {
            Some(OptionValue::Uuid(value)) => Some(*value),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared or not a uri option.
    pub fn uri(&self, name: &str) -> Result<Option<&Url>> {
        Ok(match self.typed(name, ValueType::Uri)? {
            Some(OptionValue::Uri(value)) => Some(value),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Fails if `name` is undeclared or not a string list option.
    pub fn list(&self, name: &str) -> Result<Option<&[String]>> {
        Ok(match self.typed(name, ValueType::StringList)? {
            Some(OptionValue::StringList(value)) => Some(value.as_slice()),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::MissingRequired`] if the option is unset.
    pub fn require_string(&self, name: &str) -> Result<&str> {
        self.string(name)?
            .ok_or_else(|| Error::MissingRequired(name.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`Error::MissingRequired`] if the option is unset.
    pub fn require_uuid(&self, name: &str) -> Result<Uuid> {
        self.uuid(name)?
            .ok_or_else(|| Error::MissingRequired(name.to_string()))
    }

    /// # Errors
    ///
    /// Returns [`Error::MissingRequired`] if the option is unset.
    pub fn require_uri(&self, name: &str) -> Result<&Url> {
        self.uri(name)?
            .ok_or_else(|| Error::MissingRequired(name.to_string()))
    }

    // Attach a handle keyed by its type, replacing any previous one of that type
    pub fn attach<T: Any + Send + Sync>(&mut self, value: T) {
        self.attachments.insert(TypeId::of::<T>(), Box::new(value));
    }

    #[must_use]
    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.attachments
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}
