use std::fmt;
use std::sync::Arc;

use clap::{Arg, ArgAction};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};

// Declared type of an option slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Integer,
    Boolean,
    Uuid,
    Uri,
    StringList,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Uuid => "uuid",
            ValueType::Uri => "uri",
            ValueType::StringList => "string list",
        };
        f.write_str(name)
    }
}

/// A typed value held by one settings slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Uuid(Uuid),
    Uri(Url),
    StringList(Vec<String>),
}

impl OptionValue {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            OptionValue::String(_) => ValueType::String,
            OptionValue::Integer(_) => ValueType::Integer,
            OptionValue::Boolean(_) => ValueType::Boolean,
            OptionValue::Uuid(_) => ValueType::Uuid,
            OptionValue::Uri(_) => ValueType::Uri,
            OptionValue::StringList(_) => ValueType::StringList,
        }
    }

    /// Convert into the generic JSON form stored in profiles.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            OptionValue::String(s) => Value::String(s.clone()),
            OptionValue::Integer(i) => Value::from(*i),
            OptionValue::Boolean(b) => Value::Bool(*b),
            OptionValue::Uuid(id) => Value::String(id.to_string()),
            OptionValue::Uri(url) => Value::String(url.to_string()),
            OptionValue::StringList(items) => Value::from(items.clone()),
        }
    }

    /// Re-type a stored JSON value as `value_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON value does not deserialize into the requested type.
    pub fn from_json(value_type: ValueType, value: &Value) -> serde_json::Result<Self> {
        let value = value.clone();
        Ok(match value_type {
            ValueType::String => OptionValue::String(serde_json::from_value(value)?),
            ValueType::Integer => OptionValue::Integer(serde_json::from_value(value)?),
            ValueType::Boolean => OptionValue::Boolean(serde_json::from_value(value)?),
            ValueType::Uuid => OptionValue::Uuid(serde_json::from_value(value)?),
            ValueType::Uri => OptionValue::Uri(serde_json::from_value(value)?),
            ValueType::StringList => OptionValue::StringList(serde_json::from_value(value)?),
        })
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::String(s) => f.write_str(s),
            OptionValue::Integer(i) => write!(f, "{i}"),
            OptionValue::Boolean(b) => write!(f, "{b}"),
            OptionValue::Uuid(id) => write!(f, "{id}"),
            OptionValue::Uri(url) => write!(f, "{url}"),
            OptionValue::StringList(items) => f.write_str(&items.join(",")),
        }
    }
}

/// Declaration of a single configurable value.
///
/// Aliases of one character become short flags, longer ones long flags. An
/// option without aliases is exposed as `--<name>` with underscores turned
/// into dashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    name: String,
    aliases: Vec<String>,
    positional: Option<usize>,
    description: String,
    value_type: ValueType,
    required: bool,
    default: Option<OptionValue>,
    persistable: bool,
    hidden: bool,
}

impl OptionSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            positional: None,
            description: String::new(),
            value_type,
            required: false,
            default: None,
            persistable: true,
            hidden: false,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    // Zero-based position among the command's positional arguments
    #[must_use]
    pub fn positional(mut self, index: usize) -> Self {
        self.positional = Some(index);
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: OptionValue) -> Self {
        self.default = Some(value);
        self
    }

    // Never written to a profile
    #[must_use]
    pub fn not_persisted(mut self) -> Self {
        self.persistable = false;
        self
    }

    // Derived slot populated by modules; not exposed as an argument and never persisted
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    #[must_use]
    pub fn positional_index(&self) -> Option<usize> {
        self.positional
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn default(&self) -> Option<&OptionValue> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persistable && !self.hidden
    }

    /// Two declarations may share one slot only if they agree on everything but the description.
    #[must_use]
    pub fn is_compatible(&self, other: &OptionSpec) -> bool {
        self.name == other.name
            && self.aliases == other.aliases
            && self.positional == other.positional
            && self.value_type == other.value_type
            && self.required == other.required
            && self.default == other.default
            && self.persistable == other.persistable
            && self.hidden == other.hidden
    }

    /// Convert raw argument text into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if a value cannot be parsed as the declared type,
    /// or if several values are given to a scalar option.
    pub fn parse_values(&self, raw: &[String]) -> Result<OptionValue> {
        let single = match (self.value_type, raw) {
            (ValueType::StringList, _) => return Ok(OptionValue::StringList(raw.to_vec())),
            (_, [single]) => single,
            _ => return Err(self.invalid(&raw.join(","))),
        };

        let value = match self.value_type {
            ValueType::String | ValueType::StringList => OptionValue::String(single.clone()),
            ValueType::Integer => {
                OptionValue::Integer(single.parse().map_err(|_| self.invalid(single))?)
            }
            ValueType::Boolean => {
                OptionValue::Boolean(single.parse().map_err(|_| self.invalid(single))?)
            }
            ValueType::Uuid => {
                OptionValue::Uuid(Uuid::parse_str(single).map_err(|_| self.invalid(single))?)
            }
            ValueType::Uri => OptionValue::Uri(Url::parse(single).map_err(|_| self.invalid(single))?),
        };
        Ok(value)
    }

    fn invalid(&self, value: &str) -> Error {
        Error::InvalidValue {
            option: self.name.clone(),
            expected: self.value_type,
            value: value.to_string(),
        }
    }

    /// Declaration handed to the argument parser.
    ///
    /// Required options and defaults are not enforced by clap: profiles may
    /// still fill them after parsing.
    #[must_use]
    pub fn to_arg(&self) -> Arg {
        let mut help = self.description.clone();
        if let Some(default) = &self.default {
            help.push_str(&format!(" [default: {default}]"));
        }
        if self.required {
            help.push_str(" [required]");
        }

        let mut arg = Arg::new(self.name.clone()).help(help.trim().to_string());

        if let Some(index) = self.positional {
            arg = arg
                .index(index + 1)
                .value_name(self.name.to_uppercase());
        } else {
            let (shorts, longs): (Vec<&String>, Vec<&String>) =
                self.aliases.iter().partition(|alias| alias.chars().count() == 1);

            let mut longs = longs.into_iter().cloned();
            let primary = longs
                .next()
                .unwrap_or_else(|| self.name.replace('_', "-"));
            arg = arg.long(primary).visible_aliases(longs.collect::<Vec<_>>());

            let mut shorts = shorts.into_iter().filter_map(|alias| alias.chars().next());
            if let Some(short) = shorts.next() {
                arg = arg.short(short);
            }
            arg = arg.visible_short_aliases(shorts.collect::<Vec<_>>());
        }

        match self.value_type {
            ValueType::StringList => arg.action(ArgAction::Append).value_delimiter(','),
            ValueType::Boolean if self.positional.is_none() => arg
                .action(ArgAction::Set)
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value("true"),
            ValueType::Integer => arg.action(ArgAction::Set).allow_negative_numbers(true),
            _ => arg.action(ArgAction::Set),
        }
    }
}

/// A named, reusable bundle of options.
///
/// The `id` is the group's identity: profiles store values under it and the
/// composer deduplicates by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionGroup {
    id: String,
    description: String,
    options: Vec<OptionSpec>,
    includes: Vec<Arc<OptionGroup>>,
}

impl OptionGroup {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            options: Vec::new(),
            includes: Vec::new(),
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }

    // Expose every option of `group` alongside this group's own
    #[must_use]
    pub fn include(mut self, group: Arc<OptionGroup>) -> Self {
        self.includes.push(group);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    #[must_use]
    pub fn includes(&self) -> &[Arc<OptionGroup>] {
        &self.includes
    }
}
