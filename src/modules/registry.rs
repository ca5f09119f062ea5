//! Catalogue of known modules
//!
//! The registry holds static descriptors only. Instances are created and owned
//! by the [`ModuleLoader`](crate::modules::loader::ModuleLoader).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::modules::interface::{LanguageHandler, ProcessingModule};
use crate::modules::languages::{DataHandler, GoHandler, RhaiHandler, WatHandler};
use crate::modules::module::CodeModule;
use crate::types::ModuleInfo;

pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn ProcessingModule> + Send + Sync>;

#[derive(Clone)]
pub struct ModuleDescriptor {
    pub info: ModuleInfo,
    pub factory: ModuleFactory,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.info.id)
            .field("languages", &self.info.languages)
            .finish()
    }
}

impl ModuleDescriptor {
    /// Describe a module built from `make`. The handler is constructed once
    /// here to read its info; no backend is started.
    pub fn for_handler<H, F>(make: F) -> Self
    where
        H: LanguageHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let info = make().info();
        Self {
            info,
            factory: Arc::new(move || Arc::new(CodeModule::new(make())) as Arc<dyn ProcessingModule>),
        }
    }

    pub fn create(&self) -> Arc<dyn ProcessingModule> {
        (self.factory)()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ModuleRegistry {
    descriptors: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in language module
    pub fn with_builtin_modules() -> Self {
        let mut registry = Self::new();
        registry.register(ModuleDescriptor::for_handler(RhaiHandler::new));
        registry.register(ModuleDescriptor::for_handler(DataHandler::new));
        registry.register(ModuleDescriptor::for_handler(WatHandler::new));
        registry.register(ModuleDescriptor::for_handler(GoHandler::new));
        registry
    }

    /// Add or replace a descriptor keyed by its id
    pub fn register(&mut self, descriptor: ModuleDescriptor) {
        self.descriptors.insert(descriptor.info.id.clone(), descriptor);
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.descriptors.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.descriptors.values()
    }

    /// First module, in id order, that lists `language`
    pub fn find_by_language(&self, language: &str) -> Option<&ModuleDescriptor> {
        self.descriptors
            .values()
            .find(|d| d.info.supports_language(language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_modules_are_discoverable_without_loading() {
        let registry = ModuleRegistry::with_builtin_modules();
        assert_eq!(registry.ids(), vec!["go", "json", "rhai", "wat"]);
        assert_eq!(registry.find_by_language("YAML").unwrap().info.id, "json");
        assert_eq!(registry.find_by_language("wasm").unwrap().info.id, "wat");
        assert!(registry.find_by_language("cobol").is_none());
    }

    #[test]
    fn test_factory_builds_uninitialized_instances() {
        let registry = ModuleRegistry::with_builtin_modules();
        let module = registry.get("rhai").unwrap().create();
        assert_eq!(module.id(), "rhai");
        assert!(!module.is_initialized());

        tokio_test::block_on(module.initialize(None)).unwrap();
        assert!(module.is_initialized());

        let fresh = registry.get("rhai").unwrap().create();
        assert!(!fresh.is_initialized());
    }
}
