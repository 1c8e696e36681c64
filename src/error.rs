use std::io;

use thiserror::Error;

use crate::option::ValueType;

/// Configuration mistakes found while the application is being assembled.
///
/// These fail program start, never a single invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("option group '{group}' declares option '{option}' more than once")]
    DuplicateOption { group: String, option: String },

    #[error(
        "option '{option}' is declared by groups '{first}' and '{second}' with incompatible metadata"
    )]
    ConflictingOption {
        option: String,
        first: String,
        second: String,
    },

    #[error("two different option groups share the identity '{0}'")]
    ConflictingGroup(String),

    #[error("positional options must use distinct indices starting at 0, got {0:?}")]
    InvalidPositionals(Vec<usize>),

    #[error("positional option '{0}' takes several values and must come last")]
    ListPositionalNotLast(String),

    #[error("options '{first}' and '{second}' both claim the flag '{flag}'")]
    DuplicateFlag {
        flag: String,
        first: String,
        second: String,
    },

    #[error("option '{0}' uses a name reserved by the dispatcher")]
    ReservedOption(String),

    #[error("module '{0}' is registered more than once")]
    DuplicateModule(String),

    #[error("module '{module}' depends on unknown module '{dependency}'")]
    UnknownDependency { module: String, dependency: String },

    #[error("cyclic module dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("command '{0}' is registered more than once")]
    DuplicateCommand(String),

    #[error("command '{0}' uses a reserved name")]
    ReservedCommand(String),

    #[error("command '{command}' requires unknown module '{module}'")]
    UnknownModule { command: String, module: String },
}

/// Failures raised while running one invocation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("invalid profile name '{0}'")]
    InvalidProfileName(String),

    #[error("cyclic module dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("module '{module}' failed")]
    ModuleFailed {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("command failed")]
    CommandFailed(#[source] anyhow::Error),

    #[error("missing required option '{0}'")]
    MissingRequired(String),

    #[error("invalid value '{value}' for option '{option}': expected {expected}")]
    InvalidValue {
        option: String,
        expected: ValueType,
        value: String,
    },

    #[error("option '{option}' holds {expected} values, got {found}")]
    TypeMismatch {
        option: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("option '{0}' is not declared for this command")]
    UndeclaredOption(String),

    #[error("storage failure for '{key}'")]
    Storage {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to (de)serialize profile data")]
    Serialization(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is the deliberate cancel signal rather than a failure.
    ///
    /// Module and command bodies signal cancellation by returning [`Cancelled`]
    /// through `anyhow`; the core itself uses [`Error::Cancelled`].
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::ModuleFailed { source, .. } | Error::CommandFailed(source) => {
                source.downcast_ref::<Cancelled>().is_some()
            }
            _ => false,
        }
    }

    pub(crate) fn storage(key: impl Into<String>, source: io::Error) -> Self {
        Error::Storage {
            key: key.into(),
            source,
        }
    }
}

/// Marker error returned by application code to stop the pipeline silently.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cancelled by user")]
pub struct Cancelled;

pub type Result<T> = std::result::Result<T, Error>;
