//! Registry — name → component-spec factory table, plus the cross-module
//! merge performed when a dynamic library is loaded.
//!
//! An application holds an explicit `Arc<Registry>` rather than reaching
//! for a process-wide singleton — multiple independent applications in
//! the same process get independent component spaces.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::component::ComponentSpec;
use crate::engine::task::Task;
use crate::error::{Result, RuntimeError};
use crate::ffi::{ComponentRegistryAccessor, REGISTRY_ACCESSOR_SYMBOL};
use crate::plugin::{self, LoadedLibrary};

#[derive(Default)]
pub struct Registry {
    specs: RwLock<HashMap<String, Arc<ComponentSpec>>>,
    aliases: RwLock<HashMap<String, String>>,
    instances: RwLock<HashMap<String, Arc<Task>>>,
    libraries: Mutex<Vec<LoadedLibrary>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component type. Rejects a duplicate `type_name`,
    /// logging and keeping the existing spec (mirrors
    /// `Service::add_*`'s duplicate-name handling).
    pub fn register_spec(&self, spec: ComponentSpec) -> bool {
        let mut specs = self.specs.write().expect("specs lock poisoned");
        if specs.contains_key(spec.type_name()) {
            warn!(type_name = spec.type_name(), "duplicate component type, keeping existing");
            return false;
        }
        specs.insert(spec.type_name().to_string(), Arc::new(spec));
        true
    }

    /// Registers `alias_name` as another name for `canonical_type_name`.
    /// Resolved at `create` time, so it's fine to alias a type that
    /// isn't registered yet (e.g. before a library providing it loads).
    pub fn alias(&self, alias_name: &str, canonical_type_name: &str) -> bool {
        let mut aliases = self.aliases.write().expect("aliases lock poisoned");
        if aliases.contains_key(alias_name) {
            warn!(alias = alias_name, "duplicate alias, keeping existing");
            return false;
        }
        aliases.insert(alias_name.to_string(), canonical_type_name.to_string());
        true
    }

    fn resolve(&self, type_name: &str) -> String {
        self.aliases
            .read()
            .expect("aliases lock poisoned")
            .get(type_name)
            .cloned()
            .unwrap_or_else(|| type_name.to_string())
    }

    /// Instantiates `type_name` as `instance_name`. Instance names are
    /// unique across the whole registry, not just within a type.
    pub fn create(&self, type_name: &str, instance_name: &str) -> Result<Arc<Task>> {
        let canonical = self.resolve(type_name);
        let spec = self
            .specs
            .read()
            .expect("specs lock poisoned")
            .get(&canonical)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownComponent(type_name.to_string()))?;

        let mut instances = self.instances.write().expect("instances lock poisoned");
        if instances.contains_key(instance_name) {
            return Err(RuntimeError::DuplicateName(instance_name.to_string(), "task instance"));
        }
        let task = spec.create(instance_name);
        instances.insert(instance_name.to_string(), task.clone());
        Ok(task)
    }

    pub fn task(&self, instance_name: &str) -> Option<Arc<Task>> {
        self.instances.read().expect("instances lock poisoned").get(instance_name).cloned()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.instances.read().expect("instances lock poisoned").values().cloned().collect()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.specs.read().expect("specs lock poisoned").keys().cloned().collect()
    }

    /// Loads `base_name` (turned into the platform-conventional shared
    /// library filename) from `search_path`, and merges the component
    /// specs it exports into this registry.
    ///
    /// Implements the slot-pointer protocol a plugin's registry accessor
    /// is built on: if the plugin's slot is empty, this registry claims
    /// it by writing its own address there; if the slot already points
    /// at this registry, the library has already been merged and there
    /// is nothing to do; otherwise the plugin's entries are copied in via
    /// `merge_from` and the slot is then overwritten to point at this
    /// registry, so a second load of the same library (or another
    /// library sharing the same plugin-local registry) is idempotent.
    /// Logs and returns `false` on any load or protocol failure, the same
    /// "log and skip" idiom `register_spec`/`alias`/`add_attribute` use.
    pub fn add_library(&self, base_name: &str, search_path: impl AsRef<Path>) -> bool {
        let filename = plugin::platform_filename(base_name);
        let path = search_path.as_ref().join(&filename);

        let library = match plugin::load_library(&path) {
            Ok(library) => library,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load component library");
                return false;
            }
        };

        let accessor: libloading::Symbol<ComponentRegistryAccessor> = unsafe {
            match library.handle().get(REGISTRY_ACCESSOR_SYMBOL) {
                Ok(accessor) => accessor,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "library is missing the registry accessor symbol");
                    return false;
                }
            }
        };

        let host_ptr = self as *const Registry as *mut Registry;
        let merged = unsafe {
            let slot = accessor();
            if slot.is_null() {
                warn!(path = %path.display(), "library accessor returned a null slot");
                return false;
            }
            let foreign_ptr = *slot;
            if foreign_ptr == host_ptr {
                0
            } else if foreign_ptr.is_null() {
                *slot = host_ptr;
                0
            } else {
                let foreign_registry: &Registry = &*foreign_ptr;
                let count = self.merge_from(foreign_registry);
                // The foreign registry is owned by the plugin's own
                // static storage, not by us, so unlike the pointer this
                // protocol is adapted from we never attempt to free it
                // here — we only redirect the slot at the host so a
                // later load sees the self-check above instead of
                // merging the same entries again.
                *slot = host_ptr;
                count
            }
        };

        info!(path = %path.display(), merged, "component library loaded");
        self.libraries.lock().expect("libraries lock poisoned").push(library);
        true
    }

    fn merge_from(&self, other: &Registry) -> usize {
        let mut count = 0;
        let other_specs = other.specs.read().expect("specs lock poisoned");
        let mut specs = self.specs.write().expect("specs lock poisoned");
        for (name, spec) in other_specs.iter() {
            if specs.contains_key(name) {
                warn!(type_name = name, "duplicate component type from library, keeping existing");
                continue;
            }
            specs.insert(name.clone(), spec.clone());
            count += 1;
        }
        drop(specs);
        let other_aliases = other.aliases.read().expect("aliases lock poisoned");
        let mut aliases = self.aliases.write().expect("aliases lock poisoned");
        for (alias_name, canonical) in other_aliases.iter() {
            aliases.entry(alias_name.clone()).or_insert_with(|| canonical.clone());
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    struct Noop;
    impl Component for Noop {}

    fn echo_spec() -> ComponentSpec {
        ComponentSpec::new("echo", |instance| Task::new("echo", instance, Box::new(Noop)))
    }

    #[test]
    fn create_instantiates_registered_type() {
        let registry = Registry::new();
        registry.register_spec(echo_spec());
        let task = registry.create("echo", "echo1").unwrap();
        assert_eq!(task.instance_name(), "echo1");
        assert!(registry.task("echo1").is_some());
    }

    #[test]
    fn create_with_unknown_type_errors() {
        let registry = Registry::new();
        assert!(matches!(registry.create("ghost", "g1"), Err(RuntimeError::UnknownComponent(_))));
    }

    #[test]
    fn create_with_duplicate_instance_name_errors() {
        let registry = Registry::new();
        registry.register_spec(echo_spec());
        registry.create("echo", "echo1").unwrap();
        assert!(matches!(
            registry.create("echo", "echo1"),
            Err(RuntimeError::DuplicateName(_, _))
        ));
    }

    #[test]
    fn alias_resolves_to_canonical_type() {
        let registry = Registry::new();
        registry.register_spec(echo_spec());
        assert!(registry.alias("parrot", "echo"));
        let task = registry.create("parrot", "p1").unwrap();
        assert_eq!(task.type_name(), "echo");
    }

    #[test]
    fn component_names_lists_registered_types() {
        let registry = Registry::new();
        registry.register_spec(echo_spec());
        assert_eq!(registry.component_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn merging_the_same_library_twice_is_idempotent() {
        // S6: a library exporting X and Y, merged twice (e.g. two distinct
        // paths that resolve to the same file), leaves exactly one X and one
        // Y in the host registry, and both remain constructible.
        let plugin = Registry::new();
        plugin.register_spec(ComponentSpec::new("X", |instance| {
            Task::new("X", instance, Box::new(Noop))
        }));
        plugin.register_spec(ComponentSpec::new("Y", |instance| {
            Task::new("Y", instance, Box::new(Noop))
        }));

        let host = Registry::new();
        assert_eq!(host.merge_from(&plugin), 2);
        assert_eq!(host.merge_from(&plugin), 0);

        let mut names = host.component_names();
        names.sort();
        assert_eq!(names, vec!["X".to_string(), "Y".to_string()]);
        assert!(host.create("X", "x1").is_ok());
        assert!(host.create("Y", "y1").is_ok());
    }
}
