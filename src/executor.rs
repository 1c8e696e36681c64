use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::module::{Module, ModuleRegistry};
use crate::settings::Settings;

// Visit state of a module during one traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Runs module dependency closures for a single invocation.
///
/// Each module runs at most once per executor, after all of its dependencies
/// have succeeded. Create one executor per invocation.
pub struct ModuleExecutor<'a> {
    registry: &'a ModuleRegistry,
    marks: HashMap<String, Mark>,
    stack: Vec<String>,
    executed: Vec<String>,
}

impl<'a> ModuleExecutor<'a> {
    #[must_use]
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self {
            registry,
            marks: HashMap::new(),
            stack: Vec::new(),
            executed: Vec::new(),
        }
    }

    /// Run `roots` and everything they depend on, stopping at the first failure.
    ///
    /// Modules that already ran through this executor are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModuleFailed`] wrapping the module's own error,
    /// [`Error::CyclicDependency`], or [`Error::UnknownModule`].
    pub fn execute(&mut self, roots: &[String], settings: &mut Settings) -> Result<()> {
        let mut executed = Vec::new();
        let outcome = self.walk(roots, &mut |module: &Arc<Module>| {
            debug!(module = module.name(), "running module");
            module.run(settings).map_err(|source| Error::ModuleFailed {
                module: module.name().to_string(),
                source,
            })?;
            debug!(module = module.name(), "module finished");
            executed.push(module.name().to_string());
            Ok(())
        });
        self.executed.extend(executed);
        outcome
    }

    // Names of modules that completed successfully, in run order
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    pub(crate) fn walk(
        &mut self,
        roots: &[String],
        action: &mut dyn FnMut(&Arc<Module>) -> Result<()>,
    ) -> Result<()> {
        for root in roots {
            if let Err(err) = self.visit(root, action) {
                // Forget the aborted path so a later run starts clean
                self.stack.clear();
                self.marks.retain(|_, mark| *mark == Mark::Done);
                return Err(err);
            }
        }
        Ok(())
    }

    fn visit(
        &mut self,
        name: &str,
        action: &mut dyn FnMut(&Arc<Module>) -> Result<()>,
    ) -> Result<()> {
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = self
                    .stack
                    .iter()
                    .position(|entry| entry == name)
                    .unwrap_or(0);
                let mut cycle = self.stack[start..].to_vec();
                cycle.push(name.to_string());
                return Err(Error::CyclicDependency(cycle));
            }
            None => {}
        }

        let module = Arc::clone(
            self.registry
                .get(name)
                .ok_or_else(|| Error::UnknownModule(name.to_string()))?,
        );

        self.marks.insert(name.to_string(), Mark::InProgress);
        self.stack.push(name.to_string());
        for dependency in module.dependencies() {
            self.visit(dependency, action)?;
        }
        self.stack.pop();

        action(&module)?;
        self.marks.insert(name.to_string(), Mark::Done);
        Ok(())
    }
}
