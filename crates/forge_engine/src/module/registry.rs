//! Type-keyed, staged module storage

use std::any::{type_name, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};

use super::{Module, Stage};
use crate::engine::{EngineError, EngineResult};

struct ModuleEntry {
    type_id: TypeId,
    name: &'static str,
    module: RefCell<Box<dyn Module>>,
}

/// Ordered collection of modules, at most one per concrete type
///
/// Within a stage, modules are dispatched in registration order. Lookups go
/// through `RefCell`s, so modules can reach each other while a stage is
/// being dispatched; a module cannot borrow itself that way.
#[derive(Default)]
pub struct ModuleRegistry {
    stages: BTreeMap<Stage, Vec<ModuleEntry>>,
    index: HashMap<TypeId, Stage>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `module` at the end of `stage`
    ///
    /// Fails with [`EngineError::DuplicateModule`] if a `T` is already
    /// registered; the existing instance is left untouched.
    pub fn add<T: Module>(&mut self, stage: Stage, module: T) -> EngineResult<()> {
        self.add_boxed(stage, TypeId::of::<T>(), type_name::<T>(), Box::new(module))
    }

    pub(crate) fn add_boxed(
        &mut self,
        stage: Stage,
        type_id: TypeId,
        name: &'static str,
        module: Box<dyn Module>,
    ) -> EngineResult<()> {
        if let Some(existing) = self.index.get(&type_id) {
            log::warn!("Module {} is already registered in stage {:?}", name, existing);
            return Err(EngineError::DuplicateModule(name));
        }

        self.index.insert(type_id, stage);
        self.stages.entry(stage).or_default().push(ModuleEntry {
            type_id,
            name,
            module: RefCell::new(module),
        });
        log::debug!("Registered module {} in stage {:?}", name, stage);
        Ok(())
    }

    /// Remove and drop the `T` instance; returns whether one was registered
    pub fn remove<T: Module>(&mut self) -> bool {
        self.remove_by_id(TypeId::of::<T>())
    }

    pub(crate) fn remove_by_id(&mut self, type_id: TypeId) -> bool {
        let Some(stage) = self.index.remove(&type_id) else {
            return false;
        };
        if let Some(entries) = self.stages.get_mut(&stage) {
            if let Some(position) = entries.iter().position(|entry| entry.type_id == type_id) {
                let entry = entries.remove(position);
                log::debug!("Removed module {} from stage {:?}", entry.name, stage);
            }
        }
        true
    }

    /// Whether a `T` is registered
    pub fn has<T: Module>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<T>())
    }

    /// Stage the `T` instance is registered in
    pub fn stage_of<T: Module>(&self) -> Option<Stage> {
        self.index.get(&TypeId::of::<T>()).copied()
    }

    /// Borrow the `T` instance
    ///
    /// `None` if no `T` is registered or it is currently borrowed mutably
    /// (for instance because it is the module being dispatched).
    pub fn get<T: Module>(&self) -> Option<Ref<'_, T>> {
        let entry = self.entry(TypeId::of::<T>())?;
        let module = entry.module.try_borrow().ok()?;
        Ref::filter_map(module, |module| (**module).as_any().downcast_ref::<T>()).ok()
    }

    /// Mutably borrow the `T` instance
    pub fn get_mut<T: Module>(&self) -> Option<RefMut<'_, T>> {
        let entry = self.entry(TypeId::of::<T>())?;
        let module = entry.module.try_borrow_mut().ok()?;
        RefMut::filter_map(module, |module| (**module).as_any_mut().downcast_mut::<T>()).ok()
    }

    /// Invoke `f` on every module of `stage` in registration order
    ///
    /// Stops at and returns the first error.
    pub fn for_each<F>(&self, stage: Stage, mut f: F) -> EngineResult<()>
    where
        F: FnMut(&'static str, &mut dyn Module) -> EngineResult<()>,
    {
        let Some(entries) = self.stages.get(&stage) else {
            return Ok(());
        };
        for entry in entries {
            let mut module = entry
                .module
                .try_borrow_mut()
                .map_err(|_| EngineError::ModuleBusy(entry.name))?;
            f(entry.name, &mut **module)?;
        }
        Ok(())
    }

    /// Type names of the modules in `stage`, in dispatch order
    pub fn names(&self, stage: Stage) -> Vec<&'static str> {
        self.stages
            .get(&stage)
            .map(|entries| entries.iter().map(|entry| entry.name).collect())
            .unwrap_or_default()
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no modules are registered
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Drop every module, last dispatched first
    pub fn clear(&mut self) {
        for stage in Stage::ALL.iter().rev() {
            if let Some(mut entries) = self.stages.remove(stage) {
                while let Some(entry) = entries.pop() {
                    log::debug!("Destroying module {}", entry.name);
                    drop(entry);
                }
            }
        }
        self.index.clear();
    }

    fn entry(&self, type_id: TypeId) -> Option<&ModuleEntry> {
        let stage = self.index.get(&type_id)?;
        self.stages.get(stage)?.iter().find(|entry| entry.type_id == type_id)
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleContext;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct Named<const N: usize> {
        log: Log,
        value: u32,
    }

    impl<const N: usize> Named<N> {
        fn new(log: &Log) -> Self {
            Self {
                log: Rc::clone(log),
                value: 0,
            }
        }
    }

    const NAMES: [&str; 4] = ["a", "b", "c", "d"];

    impl<const N: usize> Module for Named<N> {
        fn update(&mut self, _ctx: &mut ModuleContext<'_>) -> EngineResult<()> {
            self.log.borrow_mut().push(NAMES[N]);
            Ok(())
        }
    }

    impl<const N: usize> Drop for Named<N> {
        fn drop(&mut self) {
            self.log.borrow_mut().push(NAMES[N]);
        }
    }

    #[test]
    fn test_add_has_remove_track_net_state() {
        let log = Log::default();
        let mut registry = ModuleRegistry::new();

        assert!(!registry.has::<Named<0>>());
        registry.add(Stage::UpdateNormal, Named::<0>::new(&log)).unwrap();
        assert!(registry.has::<Named<0>>());
        assert_eq!(registry.stage_of::<Named<0>>(), Some(Stage::UpdateNormal));

        assert!(registry.remove::<Named<0>>());
        assert!(!registry.has::<Named<0>>());
        assert!(!registry.remove::<Named<0>>());
        assert!(registry.is_empty());

        registry.add(Stage::Render, Named::<0>::new(&log)).unwrap();
        assert_eq!(registry.stage_of::<Named<0>>(), Some(Stage::Render));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_keeps_existing() {
        let log = Log::default();
        let mut registry = ModuleRegistry::new();
        let mut first = Named::<0>::new(&log);
        first.value = 7;

        registry.add(Stage::UpdateNormal, first).unwrap();
        let result = registry.add(Stage::Render, Named::<0>::new(&log));

        assert!(matches!(result, Err(EngineError::DuplicateModule(_))));
        assert_eq!(registry.stage_of::<Named<0>>(), Some(Stage::UpdateNormal));
        assert_eq!(registry.get::<Named<0>>().map(|m| m.value), Some(7));
    }

    #[test]
    fn test_get_absent_is_none() {
        let registry = ModuleRegistry::new();
        assert!(registry.get::<Named<1>>().is_none());
        assert!(registry.get_mut::<Named<1>>().is_none());
    }

    #[test]
    fn test_get_mut_modifies_instance() {
        let log = Log::default();
        let mut registry = ModuleRegistry::new();
        registry.add(Stage::Always, Named::<2>::new(&log)).unwrap();

        registry.get_mut::<Named<2>>().unwrap().value = 11;
        assert_eq!(registry.get::<Named<2>>().unwrap().value, 11);

        // Shared and exclusive borrows exclude each other
        let shared = registry.get::<Named<2>>();
        assert!(registry.get_mut::<Named<2>>().is_none());
        drop(shared);
    }

    #[test]
    fn test_dispatch_follows_registration_order() {
        let log = Log::default();
        let mut registry = ModuleRegistry::new();
        registry.add(Stage::UpdateNormal, Named::<2>::new(&log)).unwrap();
        registry.add(Stage::UpdateNormal, Named::<0>::new(&log)).unwrap();
        registry.add(Stage::Render, Named::<3>::new(&log)).unwrap();
        registry.add(Stage::UpdateNormal, Named::<1>::new(&log)).unwrap();

        assert_eq!(
            registry.names(Stage::UpdateNormal),
            vec![type_name::<Named<2>>(), type_name::<Named<0>>(), type_name::<Named<1>>()]
        );

        registry.remove::<Named<0>>();
        assert_eq!(
            registry.names(Stage::UpdateNormal),
            vec![type_name::<Named<2>>(), type_name::<Named<1>>()]
        );
        assert!(registry.names(Stage::PreUpdate).is_empty());
    }

    #[test]
    fn test_for_each_visits_in_order_and_stops_on_error() {
        let log = Log::default();
        let mut registry = ModuleRegistry::new();
        registry.add(Stage::UpdateNormal, Named::<0>::new(&log)).unwrap();
        registry.add(Stage::UpdateNormal, Named::<1>::new(&log)).unwrap();
        registry.add(Stage::UpdateNormal, Named::<2>::new(&log)).unwrap();

        let mut visited = Vec::new();
        let result = registry.for_each(Stage::UpdateNormal, |name, _| {
            visited.push(name);
            if visited.len() == 2 {
                return Err(EngineError::Game("stop".to_string()));
            }
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(visited, vec![type_name::<Named<0>>(), type_name::<Named<1>>()]);
    }

    #[test]
    fn test_clear_drops_in_reverse_dispatch_order() {
        let log = Log::default();
        let mut registry = ModuleRegistry::new();
        registry.add(Stage::Render, Named::<3>::new(&log)).unwrap();
        registry.add(Stage::Always, Named::<0>::new(&log)).unwrap();
        registry.add(Stage::UpdateNormal, Named::<1>::new(&log)).unwrap();
        registry.add(Stage::UpdateNormal, Named::<2>::new(&log)).unwrap();

        registry.clear();

        assert_eq!(*log.borrow(), vec!["d", "c", "b", "a"]);
        assert!(registry.is_empty());
    }
}
