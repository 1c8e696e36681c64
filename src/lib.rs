//! Command-line application framework.
//!
//! Commands declare the option groups they expose and the setup modules
//! they need. At start-up every command's options are composed into a single
//! [`SettingsShape`]. On each invocation the [`App`] dispatcher runs the
//! pipeline:
//!
//! 1. parse arguments into a [`Settings`] instance
//! 2. fill unset values from stored profiles
//! 3. store a profile and stop, if asked to
//! 4. run the module dependency closure, each module at most once
//! 5. run the command body

pub mod app;
pub mod composer;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod module;
pub mod option;
pub mod profile;
pub mod settings;
pub mod storage;

pub use app::{App, AppBuilder, Command, ADD_PROFILE_AS, PROFILES, STORE_PROFILE_AS};
pub use composer::{compose, SettingsShape, Slot};
pub use config::AppConfig;
pub use error::{Cancelled, Error, RegistrationError, Result};
pub use executor::ModuleExecutor;
pub use module::{Module, ModuleRegistry};
pub use option::{OptionGroup, OptionSpec, OptionValue, ValueType};
pub use profile::{sanitize_profile_name, Profile, ProfileData, ProfileStore};
pub use settings::Settings;
pub use storage::{DirStore, KeyValueStore, MemoryStore};
