use std::ffi::OsString;
use std::fmt::Write as _;
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches};
use indexmap::IndexMap;
use tracing::debug;

use crate::composer::{compose, SettingsShape};
use crate::config::AppConfig;
use crate::error::{Error, RegistrationError, Result};
use crate::executor::ModuleExecutor;
use crate::logging::init_logging;
use crate::module::{Module, ModuleRegistry};
use crate::option::{OptionGroup, OptionSpec, ValueType};
use crate::profile::ProfileStore;
use crate::settings::Settings;
use crate::storage::KeyValueStore;

// Cross-cutting option names injected into every command
pub const PROFILES: &str = "profiles";
pub const STORE_PROFILE_AS: &str = "store_profile_as";
pub const ADD_PROFILE_AS: &str = "add_profile_as";

const PROFILE_COMMAND: &str = "profile";
const RESERVED_FLAGS: &[&str] = &["verbose", "quiet", "help", "version", "v", "q", "h", "V"];

// Profiles to apply before the command runs
#[must_use]
pub fn profile_selection_group() -> Arc<OptionGroup> {
    OptionGroup::new("profile-selection")
        .describe("Select stored profiles")
        .option(
            OptionSpec::new(PROFILES, ValueType::StringList)
                .alias("p")
                .alias("profile")
                .describe("Apply stored profiles, earliest first")
                .not_persisted(),
        )
        .build()
}

// Store the invocation's values instead of running the command
#[must_use]
pub fn profile_storage_group() -> Arc<OptionGroup> {
    OptionGroup::new("profile-storage")
        .describe("Store the given options as a profile")
        .option(
            OptionSpec::new(STORE_PROFILE_AS, ValueType::String)
                .alias("store-profile-as")
                .describe("Save the given options as a new profile and exit")
                .not_persisted(),
        )
        .option(
            OptionSpec::new(ADD_PROFILE_AS, ValueType::String)
                .alias("add-profile-as")
                .describe("Merge the given options into a profile and exit")
                .not_persisted(),
        )
        .build()
}

type CommandBody = dyn Fn(&mut Settings) -> anyhow::Result<i32> + Send + Sync;

/// A command: its option groups, the modules it needs, and its body.
///
/// The body's return value becomes the process exit code.
pub struct Command {
    name: String,
    about: String,
    groups: Vec<Arc<OptionGroup>>,
    modules: Vec<String>,
    examples: Vec<Vec<String>>,
    implicit_profile: bool,
    body: Box<CommandBody>,
}

impl Command {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Settings) -> anyhow::Result<i32> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            about: String::new(),
            groups: Vec::new(),
            modules: Vec::new(),
            examples: Vec::new(),
            implicit_profile: true,
            body: Box::new(body),
        }
    }

    #[must_use]
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    #[must_use]
    pub fn uses(mut self, group: Arc<OptionGroup>) -> Self {
        self.groups.push(group);
        self
    }

    // Direct module requirements; transitive ones are resolved at run time
    #[must_use]
    pub fn requires(mut self, module: impl Into<String>) -> Self {
        self.modules.push(module.into());
        self
    }

    #[must_use]
    pub fn example(mut self, args: &[&str]) -> Self {
        self.examples
            .push(args.iter().map(|arg| (*arg).to_string()).collect());
        self
    }

    // Whether the selected default profile applies when no --profile is given
    #[must_use]
    pub fn implicit_profile(mut self, enabled: bool) -> Self {
        self.implicit_profile = enabled;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    #[must_use]
    pub fn examples(&self) -> &[Vec<String>] {
        &self.examples
    }
}

struct Registered {
    command: Command,
    shape: Arc<SettingsShape>,
}

/// Collects modules and commands, then validates them all at once.
pub struct AppBuilder {
    config: AppConfig,
    version: String,
    about: String,
    modules: Vec<Module>,
    commands: Vec<Command>,
    store: Option<Box<dyn KeyValueStore>>,
}

impl AppBuilder {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
            about: String::new(),
            modules: Vec::new(),
            commands: Vec::new(),
            store: None,
        }
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    #[must_use]
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    // Replace the directory store derived from the config
    #[must_use]
    pub fn store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Register everything and compose each command's settings shape.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistrationError`] found: duplicate or reserved
    /// names, unknown or cyclic module dependencies, or incompatible options.
    pub fn build(self) -> std::result::Result<App, RegistrationError> {
        let mut modules = ModuleRegistry::new();
        for module in self.modules {
            modules.register(module)?;
        }
        modules.validate()?;

        let mut commands = IndexMap::new();
        for command in self.commands {
            let shape = compose_command(&modules, &command)?;
            if commands.contains_key(command.name()) {
                return Err(RegistrationError::DuplicateCommand(command.name().to_string()));
            }
            commands.insert(
                command.name().to_string(),
                Registered {
                    command,
                    shape: Arc::new(shape),
                },
            );
        }

        let store: Box<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Box::new(self.config.open_store()),
        };

        Ok(App {
            config: self.config,
            version: self.version,
            about: self.about,
            modules,
            commands,
            profiles: ProfileStore::new(store),
        })
    }
}

fn compose_command(
    modules: &ModuleRegistry,
    command: &Command,
) -> std::result::Result<SettingsShape, RegistrationError> {
    if command.name() == PROFILE_COMMAND || command.name() == "help" {
        return Err(RegistrationError::ReservedCommand(command.name().to_string()));
    }
    if let Some(missing) = command.modules().iter().find(|m| !modules.contains(m)) {
        return Err(RegistrationError::UnknownModule {
            command: command.name().to_string(),
            module: missing.clone(),
        });
    }

    let mut groups = command.groups.clone();
    for root in command.modules() {
        let plan = modules
            .plan(std::slice::from_ref(root))
            .map_err(|err| match err {
                Error::CyclicDependency(cycle) => RegistrationError::CyclicDependency(cycle),
                Error::UnknownModule(module) => RegistrationError::UnknownModule {
                    command: command.name().to_string(),
                    module,
                },
                _ => RegistrationError::UnknownModule {
                    command: command.name().to_string(),
                    module: root.clone(),
                },
            })?;
        for module in &plan {
            groups.extend(module.option_groups().iter().cloned());
        }
    }
    groups.push(profile_selection_group());
    groups.push(profile_storage_group());

    let shape = compose(&groups)?;
    let reserved = shape.options().find(|spec| {
        RESERVED_FLAGS.contains(&spec.name())
            || spec
                .aliases()
                .iter()
                .any(|alias| RESERVED_FLAGS.contains(&alias.as_str()))
    });
    if let Some(spec) = reserved {
        return Err(RegistrationError::ReservedOption(spec.name().to_string()));
    }
    Ok(shape)
}

/// The command registry and per-invocation dispatcher.
pub struct App {
    config: AppConfig,
    version: String,
    about: String,
    modules: ModuleRegistry,
    commands: IndexMap<String, Registered>,
    profiles: ProfileStore<Box<dyn KeyValueStore>>,
}

impl App {
    #[must_use]
    pub fn builder(config: AppConfig) -> AppBuilder {
        AppBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn profiles(&self) -> &ProfileStore<Box<dyn KeyValueStore>> {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ProfileStore<Box<dyn KeyValueStore>> {
        &mut self.profiles
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    #[must_use]
    pub fn shape(&self, command: &str) -> Option<&Arc<SettingsShape>> {
        self.commands.get(command).map(|registered| &registered.shape)
    }

    /// The full argument parser: one subcommand per registered command plus `profile`.
    #[must_use]
    pub fn cli(&self) -> clap::Command {
        let mut root = clap::Command::new(self.config.app_name.clone())
            .version(self.version.clone())
            .about(self.about.clone())
            .subcommand_required(true)
            .arg_required_else_help(true)
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .help("Enable debug logging")
                    .action(ArgAction::SetTrue)
                    .global(true),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .help("Only log warnings and errors")
                    .action(ArgAction::SetTrue)
                    .global(true),
            );

        for registered in self.commands.values() {
            root = root.subcommand(self.command_cli(registered));
        }
        root.subcommand(profile_cli())
    }

    fn command_cli(&self, registered: &Registered) -> clap::Command {
        let command = &registered.command;
        let args: Vec<Arg> = registered
            .shape
            .options()
            .filter(|spec| !spec.is_hidden())
            .map(OptionSpec::to_arg)
            .collect();

        let mut sub = clap::Command::new(command.name.clone())
            .about(command.about.clone())
            .args(args);

        if !command.examples.is_empty() {
            let mut help = String::from("Examples:\n");
            for example in &command.examples {
                let _ = writeln!(help, "  {} {}", self.config.app_name, example.join(" "));
            }
            sub = sub.after_help(help);
        }
        sub
    }

    /// Parse `args` and run the invocation, returning the process exit code.
    ///
    /// This is the only place errors are turned into text and exit codes.
    pub fn dispatch<I, T>(&mut self, args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = match self.cli().try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(err) => {
                let _ = err.print();
                return err.exit_code();
            }
        };

        init_logging(matches.get_flag("verbose"), matches.get_flag("quiet"));

        match self.run(&matches) {
            Ok(code) => code,
            Err(err) if err.is_cancel() => {
                debug!("invocation cancelled");
                0
            }
            Err(err) => {
                eprintln!("error: {:#}", anyhow::Error::from(err));
                1
            }
        }
    }

    fn run(&mut self, matches: &ArgMatches) -> Result<i32> {
        match matches.subcommand() {
            Some((PROFILE_COMMAND, sub)) => self.run_profile_command(sub),
            Some((name, sub)) => {
                let shape = self
                    .shape(name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
                let settings = Settings::from_matches(shape, sub)?;
                self.execute(name, settings)
            }
            None => Ok(0),
        }
    }

    /// Run the pipeline for an already parsed settings instance.
    ///
    /// Profiles are applied (fill-only), then a requested profile store ends
    /// the invocation with [`Error::Cancelled`]. Otherwise defaults are filled,
    /// required options are checked, the module closure runs and finally the
    /// command body.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any step.
    pub fn execute(&mut self, command: &str, mut settings: Settings) -> Result<i32> {
        let registered = self
            .commands
            .get(command)
            .ok_or_else(|| Error::UnknownCommand(command.to_string()))?;

        let mut profiles = settings.list(PROFILES)?.map(<[String]>::to_vec).unwrap_or_default();
        if profiles.is_empty() && registered.command.implicit_profile {
            if let Some(default) = self.profiles.default_profile()? {
                debug!(profile = default.as_str(), "using default profile");
                profiles.push(default);
            }
        }
        if !profiles.is_empty() {
            let filled = self.profiles.apply(&profiles, &mut settings)?;
            debug!(filled, "profiles applied");
        }

        if let Some(name) = settings.string(ADD_PROFILE_AS)?.map(str::to_string) {
            let profile = self.profiles.store(&name, &settings, true)?;
            println!("profile '{}' updated", profile.name);
            return Err(Error::Cancelled);
        }
        if let Some(name) = settings.string(STORE_PROFILE_AS)?.map(str::to_string) {
            let profile = self.profiles.store(&name, &settings, false)?;
            println!("profile '{}' stored", profile.name);
            return Err(Error::Cancelled);
        }

        settings.apply_defaults();
        settings.check_required()?;

        ModuleExecutor::new(&self.modules).execute(registered.command.modules(), &mut settings)?;

        (registered.command.body)(&mut settings).map_err(Error::CommandFailed)
    }

    fn run_profile_command(&mut self, matches: &ArgMatches) -> Result<i32> {
        match matches.subcommand() {
            Some(("list", _)) => {
                let default = self.profiles.default_profile()?;
                let names = self.profiles.list()?;
                if names.is_empty() {
                    println!("no profiles stored");
                }
                for name in names {
                    let marker = if default.as_deref() == Some(name.as_str()) { "*" } else { " " };
                    println!("{marker} {name}");
                }
                Ok(0)
            }
            Some(("show", sub)) => {
                let profile = self.profiles.load(name_arg(sub))?;
                println!("{}", serde_json::to_string_pretty(&profile.data)?);
                Ok(0)
            }
            Some(("select", sub)) => {
                let name = name_arg(sub);
                if !self.profiles.select(name)? {
                    return Err(Error::ProfileNotFound(name.to_string()));
                }
                println!("profile '{name}' selected");
                Ok(0)
            }
            Some(("unselect", _)) => {
                if self.profiles.unselect()? {
                    println!("default profile cleared");
                } else {
                    println!("no default profile selected");
                }
                Ok(0)
            }
            Some(("delete", sub)) => {
                let name = name_arg(sub);
                if !self.profiles.delete(name)? {
                    return Err(Error::ProfileNotFound(name.to_string()));
                }
                println!("profile '{name}' deleted");
                Ok(0)
            }
            Some(("current", _)) => {
                match self.profiles.default_profile()? {
                    Some(name) => println!("{name}"),
                    None => println!("no default profile selected"),
                }
                Ok(0)
            }
            _ => Ok(0),
        }
    }
}

fn name_arg(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("name")
        .map_or("", String::as_str)
}

fn profile_cli() -> clap::Command {
    let name = || {
        Arg::new("name")
            .help("Profile name")
            .required(true)
            .action(ArgAction::Set)
    };

    clap::Command::new(PROFILE_COMMAND)
        .about("Manage stored profiles")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(clap::Command::new("list").about("List stored profiles"))
        .subcommand(
            clap::Command::new("show")
                .about("Print the values stored in a profile")
                .arg(name()),
        )
        .subcommand(
            clap::Command::new("select")
                .about("Apply a profile by default")
                .arg(name()),
        )
        .subcommand(clap::Command::new("unselect").about("Clear the default profile"))
        .subcommand(
            clap::Command::new("delete")
                .about("Delete a stored profile")
                .arg(name()),
        )
        .subcommand(clap::Command::new("current").about("Print the default profile"))
}
