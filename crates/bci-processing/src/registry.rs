//! Filter registration and ordering
//!
//! Filters are registered under a position key. Freezing a registry sorts the
//! entries by key (byte-wise string order) and rejects duplicate keys; the
//! frozen order is the order in which a chain runs its filters.

use crate::filter::GenericFilter;
use crate::fir;
use bci_core::{BciError, BciResult};
use once_cell::sync::Lazy;
use tracing::debug;

/// Constructor for a registered filter type
pub type FilterFactory = fn() -> Box<dyn GenericFilter>;

/// One registered filter type at one chain position
#[derive(Debug, Clone)]
pub struct FilterRegistration {
    pub type_name: &'static str,
    pub position: String,
    factory: FilterFactory,
}

impl FilterRegistration {
    pub fn instantiate(&self) -> Box<dyn GenericFilter> {
        (self.factory)()
    }
}

/// Registry still accepting registrations
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    entries: Vec<FilterRegistration>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: &'static str, position: &str, factory: FilterFactory) -> &mut Self {
        debug!(type_name, position, "registering filter");
        self.entries.push(FilterRegistration {
            type_name,
            position: position.to_string(),
            factory,
        });
        self
    }

    /// Register a sub-filter; its position must sort after `parent`
    pub fn register_child(
        &mut self,
        parent: &str,
        type_name: &'static str,
        position: &str,
        factory: FilterFactory,
    ) -> BciResult<&mut Self> {
        if position <= parent {
            return Err(BciError::InvalidPosition {
                parent: parent.to_string(),
                position: position.to_string(),
            });
        }
        Ok(self.register(type_name, position, factory))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort by position and close the registry
    pub fn freeze(mut self) -> BciResult<FrozenRegistry> {
        self.entries.sort_by(|a, b| a.position.cmp(&b.position));

        if let Some(pair) = self.entries.windows(2).find(|w| w[0].position == w[1].position) {
            return Err(BciError::DuplicatePosition {
                position: pair[0].position.clone(),
                first: pair[0].type_name.to_string(),
                second: pair[1].type_name.to_string(),
            });
        }

        Ok(FrozenRegistry {
            entries: self.entries,
        })
    }
}

/// Immutable, position-ordered set of registrations
#[derive(Debug, Clone)]
pub struct FrozenRegistry {
    entries: Vec<FilterRegistration>,
}

impl FrozenRegistry {
    /// Registrations in ascending position order
    pub fn entries(&self) -> &[FilterRegistration] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate the only registered filter
    pub fn instantiate_single(&self) -> BciResult<(&FilterRegistration, Box<dyn GenericFilter>)> {
        match self.entries.as_slice() {
            [entry] => Ok((entry, entry.instantiate())),
            entries => Err(BciError::FilterCount {
                required: 1,
                registered: entries.len(),
            }),
        }
    }

    /// Create another instance of a registered type
    pub fn new_instance(&self, type_name: &str) -> BciResult<Box<dyn GenericFilter>> {
        self.entries
            .iter()
            .find(|entry| entry.type_name == type_name)
            .map(FilterRegistration::instantiate)
            .ok_or_else(|| BciError::UnknownFilter {
                type_name: type_name.to_string(),
            })
    }

    pub fn first_position(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.position.as_str())
    }

    pub fn last_position(&self) -> Option<&str> {
        self.entries.last().map(|entry| entry.position.as_str())
    }
}

static BUILTIN: Lazy<BciResult<FrozenRegistry>> = Lazy::new(|| {
    let mut registry = FilterRegistry::new();
    fir::register(&mut registry);
    registry.freeze()
});

/// Registry of the filters shipped with this crate
pub fn builtin_registry() -> BciResult<&'static FrozenRegistry> {
    BUILTIN.as_ref().map_err(Clone::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FilterChain;
    use crate::environment::{Diagnostics, Environment};
    use bci_core::{Signal, SignalProperties};

    struct Passthrough;

    impl GenericFilter for Passthrough {
        fn name(&self) -> &str {
            "Passthrough"
        }

        fn preflight(&self, _: &Environment, input: &SignalProperties, _: &mut Diagnostics) -> SignalProperties {
            input.clone()
        }

        fn initialize(&mut self, _: &Environment, _: &SignalProperties, _: &SignalProperties) -> BciResult<()> {
            Ok(())
        }

        fn process(&mut self, _: &mut Environment, input: &Signal, output: &mut Signal) -> BciResult<()> {
            output.copy_from(input)
        }
    }

    fn passthrough() -> Box<dyn GenericFilter> {
        Box::new(Passthrough)
    }

    fn positions(registry: &FrozenRegistry) -> Vec<&str> {
        registry.entries().iter().map(|e| e.position.as_str()).collect()
    }

    #[test]
    fn test_freeze_sorts_by_position() {
        let mut registry = FilterRegistry::new();
        registry
            .register("B", "2.B", passthrough)
            .register("A", "1.A", passthrough)
            .register("C", "1.B", passthrough);

        let frozen = registry.freeze().unwrap();
        assert_eq!(positions(&frozen), vec!["1.A", "1.B", "2.B"]);
        assert_eq!(frozen.first_position(), Some("1.A"));
        assert_eq!(frozen.last_position(), Some("2.B"));
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let mut registry = FilterRegistry::new();
        registry
            .register("Lower", "1.a", passthrough)
            .register("Upper", "1.B", passthrough)
            .register("Ten", "10.A", passthrough)
            .register("Two", "2.A", passthrough);

        let frozen = registry.freeze().unwrap();
        assert_eq!(positions(&frozen), vec!["1.B", "1.a", "10.A", "2.A"]);
    }

    #[test]
    fn test_duplicate_position_rejected() {
        let mut registry = FilterRegistry::new();
        registry
            .register("First", "2.C", passthrough)
            .register("Second", "2.C", passthrough);

        let err = registry.freeze().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, BciError::DuplicatePosition { ref position, .. } if position == "2.C"));
    }

    #[test]
    fn test_child_must_follow_parent() {
        let mut registry = FilterRegistry::new();
        assert!(registry.register_child("2.C", "Child", "2.C.1", passthrough).is_ok());
        assert!(matches!(
            registry.register_child("2.C", "Early", "2.B", passthrough),
            Err(BciError::InvalidPosition { .. })
        ));
        assert!(registry.register_child("2.C", "Same", "2.C", passthrough).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_child_runs_directly_after_parent() {
        let mut registry = FilterRegistry::new();
        registry
            .register("Sibling", "2.D", passthrough)
            .register("Parent", "2.C", passthrough);
        registry.register_child("2.C", "Child", "2.C.1", passthrough).unwrap();

        let frozen = registry.freeze().unwrap();
        assert_eq!(positions(&frozen), vec!["2.C", "2.C.1", "2.D"]);

        let chain = FilterChain::instantiate(&frozen).unwrap();
        assert_eq!(chain.positions(), vec!["2.C", "2.C.1", "2.D"]);
        assert_eq!(chain.type_names(), vec!["Parent", "Child", "Sibling"]);
    }

    #[test]
    fn test_instantiate_single() {
        let mut registry = FilterRegistry::new();
        registry.register("Passthrough", "1.A", passthrough);
        let frozen = registry.freeze().unwrap();
        let (entry, filter) = frozen.instantiate_single().unwrap();
        assert_eq!(entry.position, "1.A");
        assert_eq!(filter.name(), "Passthrough");

        let empty = FilterRegistry::new().freeze().unwrap();
        assert!(matches!(
            empty.instantiate_single(),
            Err(BciError::FilterCount { required: 1, registered: 0 })
        ));
    }

    #[test]
    fn test_new_instance() {
        let mut registry = FilterRegistry::new();
        registry.register("Passthrough", "1.A", passthrough);
        let frozen = registry.freeze().unwrap();

        assert_eq!(frozen.new_instance("Passthrough").unwrap().name(), "Passthrough");
        assert!(matches!(
            frozen.new_instance("Missing"),
            Err(BciError::UnknownFilter { .. })
        ));
    }

    #[test]
    fn test_builtin_registry_holds_fir() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.entries()[0].type_name, fir::TYPE_NAME);
        assert_eq!(registry.first_position(), Some(fir::POSITION));
    }
}
