use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::RegistrationError;
use crate::option::{OptionGroup, OptionSpec, ValueType};

/// One storage slot of a composed shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    spec: OptionSpec,
    groups: Vec<String>,
}

impl Slot {
    #[must_use]
    pub fn spec(&self) -> &OptionSpec {
        &self.spec
    }

    // Identities of every group exposing this option, in discovery order
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

/// Every option a command exposes, one slot per distinct option name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsShape {
    groups: Vec<Arc<OptionGroup>>,
    slots: IndexMap<String, Slot>,
}

impl SettingsShape {
    // Distinct groups in discovery order, included groups before their includers
    #[must_use]
    pub fn groups(&self) -> &[Arc<OptionGroup>] {
        &self.groups
    }

    #[must_use]
    pub fn group(&self, id: &str) -> Option<&Arc<OptionGroup>> {
        self.groups.iter().find(|group| group.id() == id)
    }

    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn options(&self) -> impl Iterator<Item = &OptionSpec> {
        self.slots.values().map(|slot| &slot.spec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Merge option groups into a single shape.
///
/// Groups are walked through their inclusions and deduplicated by identity.
/// An option name that appears in several groups shares one slot, provided
/// the declarations are compatible.
///
/// # Errors
///
/// Returns a [`RegistrationError`] if a group repeats an option name, two
/// different groups claim the same identity, two declarations of one option
/// disagree, two options claim the same flag, or positional indices are not `0..n`.
pub fn compose(groups: &[Arc<OptionGroup>]) -> Result<SettingsShape, RegistrationError> {
    let mut shape = SettingsShape::default();
    for group in groups {
        add_group(&mut shape, group)?;
    }
    check_positionals(&shape)?;
    check_flags(&shape)?;
    Ok(shape)
}

fn add_group(shape: &mut SettingsShape, group: &Arc<OptionGroup>) -> Result<(), RegistrationError> {
    if let Some(seen) = shape.group(group.id()) {
        if Arc::ptr_eq(seen, group) || **seen == **group {
            return Ok(());
        }
        return Err(RegistrationError::ConflictingGroup(group.id().to_string()));
    }

    for included in group.includes() {
        add_group(shape, included)?;
    }

    let mut local = HashSet::new();
    for spec in group.options() {
        if !local.insert(spec.name()) {
            return Err(RegistrationError::DuplicateOption {
                group: group.id().to_string(),
                option: spec.name().to_string(),
            });
        }

        match shape.slots.get_mut(spec.name()) {
            Some(slot) if slot.spec.is_compatible(spec) => {
                slot.groups.push(group.id().to_string());
            }
            Some(slot) => {
                return Err(RegistrationError::ConflictingOption {
                    option: spec.name().to_string(),
                    first: slot.groups.first().cloned().unwrap_or_default(),
                    second: group.id().to_string(),
                });
            }
            None => {
                shape.slots.insert(
                    spec.name().to_string(),
                    Slot {
                        spec: spec.clone(),
                        groups: vec![group.id().to_string()],
                    },
                );
            }
        }
    }

    shape.groups.push(Arc::clone(group));
    Ok(())
}

fn check_positionals(shape: &SettingsShape) -> Result<(), RegistrationError> {
    let mut indices: Vec<usize> = shape
        .options()
        .filter(|spec| !spec.is_hidden())
        .filter_map(OptionSpec::positional_index)
        .collect();
    indices.sort_unstable();

    if !indices.iter().enumerate().all(|(expected, index)| expected == *index) {
        return Err(RegistrationError::InvalidPositionals(indices));
    }

    // Only the last positional may swallow several values
    let last = indices.last().copied();
    let greedy = shape.options().find(|spec| {
        !spec.is_hidden()
            && spec.value_type() == ValueType::StringList
            && spec.positional_index().is_some()
            && spec.positional_index() != last
    });
    match greedy {
        Some(spec) => Err(RegistrationError::ListPositionalNotLast(spec.name().to_string())),
        None => Ok(()),
    }
}

// Flag spellings an option answers to on the command line
fn flags(spec: &OptionSpec) -> Vec<String> {
    if spec.is_hidden() || spec.positional_index().is_some() {
        return Vec::new();
    }
    let mut flags = spec.aliases().to_vec();
    if !flags.iter().any(|alias| alias.chars().count() > 1) {
        flags.push(spec.name().replace('_', "-"));
    }
    flags
}

fn check_flags(shape: &SettingsShape) -> Result<(), RegistrationError> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for spec in shape.options() {
        for flag in flags(spec) {
            if let Some(first) = owners.insert(flag.clone(), spec.name()) {
                if first != spec.name() {
                    return Err(RegistrationError::DuplicateFlag {
                        flag,
                        first: first.to_string(),
                        second: spec.name().to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}
