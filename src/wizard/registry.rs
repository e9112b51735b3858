use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::module::Module;
use super::step::ModuleId;
use crate::errors::WizardError;

/// Live module instances keyed by id.
pub struct Registry<D> {
    modules: BTreeMap<ModuleId, Box<dyn Module<D>>>,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }
}

impl<D> Registry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `module`, dropping any previous instance with the same id.
    pub fn install(&mut self, module: Box<dyn Module<D>>) {
        let id = module.id().clone();
        if self.modules.insert(id.clone(), module).is_some() {
            debug!(module = %id, "replaced module instance");
        } else {
            debug!(module = %id, "installed module");
        }
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get_mut(&mut self, id: &ModuleId) -> Result<&mut Box<dyn Module<D>>, WizardError> {
        self.modules
            .get_mut(id)
            .ok_or_else(|| WizardError::UnknownModule(id.to_string()))
    }

    /// Escape records of every module that has one.
    pub fn other_info(&self) -> BTreeMap<String, Value> {
        self.modules
            .iter()
            .filter_map(|(id, module)| module.other_info().map(|info| (id.to_string(), info)))
            .collect()
    }
}
