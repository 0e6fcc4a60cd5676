//! Instance store: one owned [`DataInstance`] per key.
//!
//! The store is an explicitly constructed service object. Callers create it
//! (optionally with a [`TypeRegistry`] describing how to build each known
//! key), populate it through [`InstanceStore::merge_into`] or
//! [`InstanceStore::put`], and reset it per key or wholesale.
//!
//! Every mutation goes through `&mut self`, so there is exactly one writer at
//! a time. Readers borrow with [`InstanceStore::get`] and must re-fetch after
//! a mutation; the borrow checker rules out observing a half-updated
//! instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::warn;
use snafu::prelude::*;

use crate::{
    consistency::{RepairReport, ensure_consistent},
    instance::DataInstance,
    merge::{MergeError, merge},
};

/// Builds an empty, correctly shaped instance for one key.
pub type Constructor = Box<dyn Fn() -> DataInstance + Send + Sync>;

/// Error returned by a [`RestoreHook`] that cannot accept snapshot data.
#[derive(Debug, Snafu)]
pub enum RestoreError {
    /// The hook refused the snapshot data.
    #[snafu(display("Restore hook rejected snapshot data: {message}"))]
    Rejected {
        /// Hook-provided explanation.
        message: String,
    },
}

/// Custom restore logic for a key whose in-memory shape differs from a plain
/// field copy (derived fields, unit conversions and the like).
pub trait RestoreHook: Send + Sync {
    /// Populate `destination` from snapshot data in `source`.
    fn restore_from_snapshot(
        &self,
        destination: &mut DataInstance,
        source: &DataInstance,
    ) -> Result<(), RestoreError>;

    /// Fix up derived state after a restore. Runs before the generic
    /// length repair; the default does nothing.
    fn ensure_internal_consistency(&self, _instance: &mut DataInstance) {}
}

/// Registration for one key: how to build it cold, and how to restore it.
pub struct RegisteredKind {
    constructor: Constructor,
    restore_hook: Option<Arc<dyn RestoreHook>>,
}

impl RegisteredKind {
    /// Build a fresh instance for this kind.
    pub fn construct(&self) -> DataInstance {
        (self.constructor)()
    }

    /// Restore hook, if one was registered.
    pub fn restore_hook(&self) -> Option<&Arc<dyn RestoreHook>> {
        self.restore_hook.as_ref()
    }
}

impl fmt::Debug for RegisteredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredKind")
            .field("has_restore_hook", &self.restore_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Maps key strings to constructors used for cold instantiation.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    kinds: HashMap<String, RegisteredKind>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `key`.
    pub fn register<F>(&mut self, key: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> DataInstance + Send + Sync + 'static,
    {
        self.kinds.insert(
            key.into(),
            RegisteredKind {
                constructor: Box::new(constructor),
                restore_hook: None,
            },
        );
        self
    }

    /// Register a constructor and a restore hook for `key`.
    pub fn register_with_hook<F>(
        &mut self,
        key: impl Into<String>,
        constructor: F,
        hook: Arc<dyn RestoreHook>,
    ) -> &mut Self
    where
        F: Fn() -> DataInstance + Send + Sync + 'static,
    {
        self.kinds.insert(
            key.into(),
            RegisteredKind {
                constructor: Box::new(constructor),
                restore_hook: Some(hook),
            },
        );
        self
    }

    /// Look up the registration for `key`.
    pub fn resolve(&self, key: &str) -> Option<&RegisteredKind> {
        self.kinds.get(key)
    }
}

/// How [`InstanceStore::restore`] placed snapshot data into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A registered [`RestoreHook`] populated the destination.
    Hook,
    /// The destination's fields were overwritten with the snapshot's.
    FieldCopy,
    /// No destination could be resolved; the snapshot instance was stored as is.
    Restashed,
}

/// Process-local owner of all cached instances.
#[derive(Debug, Default)]
pub struct InstanceStore {
    instances: HashMap<String, DataInstance>,
    registry: TypeRegistry,
}

impl InstanceStore {
    /// A store with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that instantiates keys through `registry`.
    pub fn with_registry(registry: TypeRegistry) -> Self {
        Self {
            instances: HashMap::new(),
            registry,
        }
    }

    /// The registry used for cold instantiation.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Mutable access to the registry.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Store `instance` under `key`, repairing length mismatches first.
    pub fn put(&mut self, key: &str, mut instance: DataInstance) -> RepairReport {
        let report = ensure_consistent(key, &mut instance);
        match self.instances.get_mut(key) {
            Some(slot) => *slot = instance,
            None => {
                self.instances.insert(key.to_string(), instance);
            }
        }
        report
    }

    /// Borrow the instance for `key`.
    pub fn get(&self, key: &str) -> Option<&DataInstance> {
        self.instances.get(key)
    }

    /// Mutably borrow the instance for `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut DataInstance> {
        self.instances.get_mut(key)
    }

    /// Whether `key` currently has an instance.
    pub fn contains(&self, key: &str) -> bool {
        self.instances.contains_key(key)
    }

    /// Borrow the instance for `key`, creating it first if absent.
    ///
    /// New instances come from the registered constructor, or are empty when
    /// `key` is not registered.
    pub fn get_or_create(&mut self, key: &str) -> &mut DataInstance {
        let registry = &self.registry;
        self.instances
            .entry(key.to_string())
            .or_insert_with(|| fresh_instance(registry, key))
    }

    /// Merge `incoming` into the instance for `key` and return the result.
    ///
    /// `incoming` is repaired by the consistency checker first. The stored
    /// instance is left untouched when the merge fails.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError`] on a structural mismatch between the stored
    /// instance and `incoming`.
    pub fn merge_into(
        &mut self,
        key: &str,
        mut incoming: DataInstance,
    ) -> Result<&DataInstance, MergeError> {
        ensure_consistent(key, &mut incoming);
        let slot = self.get_or_create(key);
        let merged = merge(slot, &incoming)?;
        *slot = merged;
        Ok(&*slot)
    }

    /// Registration for `key`, used to instantiate it cold during restore.
    pub fn resolve_type(&self, key: &str) -> Option<&RegisteredKind> {
        self.registry.resolve(key)
    }

    /// Place snapshot data for `key` into the store.
    ///
    /// The destination is the existing instance, or a freshly constructed one
    /// for registered keys. A registered restore hook is tried first; if there
    /// is none, or it fails, the destination's fields are overwritten. Keys
    /// with neither an existing instance nor a registration get `source`
    /// stored directly.
    pub fn restore(&mut self, key: &str, source: DataInstance) -> RestoreOutcome {
        let kind = self.registry.resolve(key);

        if kind.is_none() && !self.instances.contains_key(key) {
            let mut source = source;
            ensure_consistent(key, &mut source);
            self.instances.insert(key.to_string(), source);
            return RestoreOutcome::Restashed;
        }

        let destination = self
            .instances
            .entry(key.to_string())
            .or_insert_with(|| kind.map(RegisteredKind::construct).unwrap_or_default());

        let mut outcome = RestoreOutcome::FieldCopy;
        if let Some(hook) = kind.and_then(RegisteredKind::restore_hook) {
            match hook.restore_from_snapshot(destination, &source) {
                Ok(()) => outcome = RestoreOutcome::Hook,
                Err(e) => warn!("Restore hook for {key} failed ({e}); falling back to field copy"),
            }
        }
        if outcome == RestoreOutcome::FieldCopy {
            destination.replace_fields(source);
        }
        if let Some(hook) = kind.and_then(RegisteredKind::restore_hook) {
            hook.ensure_internal_consistency(destination);
        }

        ensure_consistent(key, destination);
        outcome
    }

    /// Replace the instance for `key` with a fresh one. Returns whether the
    /// key existed.
    pub fn reset(&mut self, key: &str) -> bool {
        let fresh = fresh_instance(&self.registry, key);
        match self.instances.get_mut(key) {
            Some(slot) => {
                *slot = fresh;
                true
            }
            None => false,
        }
    }

    /// Remove and return the instance for `key`.
    pub fn remove(&mut self, key: &str) -> Option<DataInstance> {
        self.instances.remove(key)
    }

    /// Drop every instance. Registrations are kept.
    pub fn clear(&mut self) {
        self.instances.clear();
    }

    /// Keys that currently hold an instance, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.instances.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the store holds no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn fresh_instance(registry: &TypeRegistry, key: &str) -> DataInstance {
    registry
        .resolve(key)
        .map(RegisteredKind::construct)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Component;

    fn mag(time: &[i64]) -> DataInstance {
        let axis = |k: f64| time.iter().map(|t| *t as f64 + k).collect();
        DataInstance::new(time.to_vec())
            .with_component("b_rtn", Component::Vector(vec![axis(0.0), axis(1.0), axis(2.0)]))
            .with_stack_source("b_rtn")
    }

    fn mag_shape() -> DataInstance {
        DataInstance::empty()
            .with_component("b_rtn", Component::Vector(vec![Vec::new(); 3]))
            .with_stack_source("b_rtn")
    }

    struct Doubler;

    impl RestoreHook for Doubler {
        fn restore_from_snapshot(
            &self,
            destination: &mut DataInstance,
            source: &DataInstance,
        ) -> Result<(), RestoreError> {
            let mut copy = source.clone();
            if let Some(Component::Vector(axes)) = copy.components_mut().get_mut("b_rtn") {
                axes.iter_mut().flatten().for_each(|v| *v *= 2.0);
            }
            destination.replace_fields(copy);
            Ok(())
        }
    }

    struct Trimmer;

    impl RestoreHook for Trimmer {
        fn restore_from_snapshot(
            &self,
            destination: &mut DataInstance,
            source: &DataInstance,
        ) -> Result<(), RestoreError> {
            destination.replace_fields(source.clone());
            Ok(())
        }

        fn ensure_internal_consistency(&self, instance: &mut DataInstance) {
            instance.components_mut().remove("scratch");
        }
    }

    struct Refuser;

    impl RestoreHook for Refuser {
        fn restore_from_snapshot(
            &self,
            _destination: &mut DataInstance,
            _source: &DataInstance,
        ) -> Result<(), RestoreError> {
            Err(RestoreError::Rejected {
                message: "unsupported layout".to_string(),
            })
        }
    }

    #[test]
    fn merge_into_creates_then_accumulates() {
        let mut store = InstanceStore::new();
        store.merge_into("mag_rtn", mag(&[1, 2, 3])).unwrap();
        let merged = store.merge_into("mag_rtn", mag(&[3, 4])).unwrap();

        assert_eq!(merged.time(), &[1, 2, 3, 4]);
        assert_eq!(merged.stacked().map(|s| s.len()), Some(4));
    }

    #[test]
    fn merge_into_is_idempotent() {
        let mut store = InstanceStore::new();
        store.merge_into("mag_rtn", mag(&[5, 1, 3])).unwrap();
        let once = store.get("mag_rtn").cloned().unwrap();
        store.merge_into("mag_rtn", mag(&[5, 1, 3])).unwrap();

        assert_eq!(store.get("mag_rtn"), Some(&once));
    }

    #[test]
    fn failed_merge_leaves_instance_untouched() {
        let mut store = InstanceStore::new();
        store.merge_into("mag_rtn", mag(&[1, 2])).unwrap();
        let before = store.get("mag_rtn").cloned().unwrap();

        let wrong = DataInstance::new(vec![3]).with_component("n", Component::Scalar(vec![1.0]));
        assert!(store.merge_into("mag_rtn", wrong).is_err());
        assert_eq!(store.get("mag_rtn"), Some(&before));
    }

    #[test]
    fn put_repairs_inconsistent_instance() {
        let mut store = InstanceStore::new();
        let bad = DataInstance::new(vec![1, 2, 3]).with_component("n", Component::Scalar(vec![1.0]));

        let report = store.put("density", bad);
        assert!(report.changed());
        assert_eq!(store.get("density").map(DataInstance::len), Some(1));
    }

    #[test]
    fn registered_keys_are_created_with_their_shape() {
        let mut registry = TypeRegistry::new();
        registry.register("mag_rtn", mag_shape);
        let mut store = InstanceStore::with_registry(registry);

        let inst = store.get_or_create("mag_rtn");
        assert!(inst.is_empty());
        assert!(inst.component("b_rtn").is_some());
        assert!(store.resolve_type("mag_rtn").is_some());
        assert!(store.resolve_type("unknown").is_none());
    }

    #[test]
    fn restore_ladder() {
        let mut registry = TypeRegistry::new();
        registry.register_with_hook("hooked", mag_shape, Arc::new(Doubler));
        registry.register_with_hook("refusing", mag_shape, Arc::new(Refuser));
        registry.register("plain", mag_shape);
        let mut store = InstanceStore::with_registry(registry);

        assert_eq!(store.restore("hooked", mag(&[1, 2])), RestoreOutcome::Hook);
        assert_eq!(store.restore("refusing", mag(&[1, 2])), RestoreOutcome::FieldCopy);
        assert_eq!(store.restore("plain", mag(&[1, 2])), RestoreOutcome::FieldCopy);
        assert_eq!(store.restore("loose", mag(&[1, 2])), RestoreOutcome::Restashed);

        let Some(Component::Vector(axes)) = store.get("hooked").and_then(|i| i.component("b_rtn"))
        else {
            panic!("expected vector component");
        };
        assert_eq!(axes[0], vec![2.0, 4.0]);
        assert_eq!(store.get("refusing"), store.get("plain"));
        assert_eq!(store.keys(), vec!["hooked", "loose", "plain", "refusing"]);
    }

    #[test]
    fn hook_fixup_runs_after_restore() {
        let mut registry = TypeRegistry::new();
        registry.register_with_hook("mag_rtn", mag_shape, Arc::new(Trimmer));
        let mut store = InstanceStore::with_registry(registry);

        let source = mag(&[1, 2]).with_component("scratch", Component::Scalar(vec![0.0; 2]));
        assert_eq!(store.restore("mag_rtn", source), RestoreOutcome::Hook);
        assert!(store.get("mag_rtn").is_some_and(|i| i.component("scratch").is_none()));
    }

    #[test]
    fn reset_and_clear() {
        let mut registry = TypeRegistry::new();
        registry.register("mag_rtn", mag_shape);
        let mut store = InstanceStore::with_registry(registry);
        store.merge_into("mag_rtn", mag(&[1, 2])).unwrap();

        assert!(store.reset("mag_rtn"));
        assert!(store.get("mag_rtn").is_some_and(DataInstance::is_empty));
        assert!(!store.reset("absent"));

        store.clear();
        assert!(store.is_empty());
        assert!(store.registry().resolve("mag_rtn").is_some());
    }
}
