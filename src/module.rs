use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Error, RegistrationError, Result};
use crate::executor::ModuleExecutor;
use crate::option::OptionGroup;
use crate::settings::Settings;

type ModuleBody = dyn Fn(&mut Settings) -> anyhow::Result<()> + Send + Sync;

/// A named setup step that runs before a command body.
///
/// Dependencies are referenced by module name. The option groups a module
/// uses are exposed by every command that depends on it, directly or
/// transitively.
pub struct Module {
    name: String,
    description: String,
    dependencies: Vec<String>,
    groups: Vec<Arc<OptionGroup>>,
    body: Box<ModuleBody>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field(
                "groups",
                &self.groups.iter().map(|g| g.id()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Module {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Settings) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            dependencies: Vec::new(),
            groups: Vec::new(),
            body: Box::new(body),
        }
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    #[must_use]
    pub fn uses(mut self, group: Arc<OptionGroup>) -> Self {
        self.groups.push(group);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    #[must_use]
    pub fn option_groups(&self) -> &[Arc<OptionGroup>] {
        &self.groups
    }

    /// Run the module body against `settings`.
    ///
    /// # Errors
    ///
    /// Returns whatever error the body reports.
    pub fn run(&self, settings: &mut Settings) -> anyhow::Result<()> {
        (self.body)(settings)
    }
}

// Registry of every module known to the application, in registration order
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Arc<Module>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateModule`] if the name is taken.
    pub fn register(&mut self, module: Module) -> std::result::Result<(), RegistrationError> {
        if self.modules.contains_key(module.name()) {
            return Err(RegistrationError::DuplicateModule(module.name().to_string()));
        }
        self.modules
            .insert(module.name().to_string(), Arc::new(module));
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Module>> {
        self.modules.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Check that every dependency exists and that the graph has no cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::UnknownDependency`] or
    /// [`RegistrationError::CyclicDependency`].
    pub fn validate(&self) -> std::result::Result<(), RegistrationError> {
        for module in self.modules.values() {
            if let Some(missing) = module
                .dependencies()
                .iter()
                .find(|dep| !self.contains(dep))
            {
                return Err(RegistrationError::UnknownDependency {
                    module: module.name().to_string(),
                    dependency: missing.clone(),
                });
            }
        }

        let all: Vec<String> = self.modules.keys().cloned().collect();
        if let Err(Error::CyclicDependency(cycle)) = self.plan(&all) {
            return Err(RegistrationError::CyclicDependency(cycle));
        }
        Ok(())
    }

    /// The dependency closure of `roots`, in execution order, without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModule`] or [`Error::CyclicDependency`].
    pub fn plan(&self, roots: &[String]) -> Result<Vec<Arc<Module>>> {
        let mut order = Vec::new();
        ModuleExecutor::new(self).walk(roots, &mut |module: &Arc<Module>| {
            order.push(Arc::clone(module));
            Ok(())
        })?;
        Ok(order)
    }
}
