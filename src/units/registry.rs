//! Unit registry
//!
//! Maps unit ids and kinds to factories. The registry is built once before a
//! run and shared read-only between workers; every resolution produces a
//! fresh unit instance.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::builtin::{FailUnit, NoopUnit, SleepUnit};
use super::command::CommandUnit;
use super::http::HttpCheckUnit;
use super::{Inputs, Unit};

/// Reserved input naming the kind a unit id resolves to
pub const KIND_INPUT: &str = "kind";

/// Constructs a fresh unit instance
pub type UnitFactory = Arc<dyn Fn() -> Box<dyn Unit> + Send + Sync>;

/// Unit id could not be turned into an implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no implementation registered for unit '{0}'")]
    NotFound(String),

    #[error("unknown kind '{kind}' for unit '{id}'")]
    UnknownKind { id: String, kind: String },

    #[error("input 'kind' of unit '{0}' must be a string")]
    InvalidKind(String),
}

struct KindEntry {
    description: String,
    factory: UnitFactory,
}

/// Registry of unit implementations
#[derive(Default)]
pub struct UnitRegistry {
    units: HashMap<String, UnitFactory>,
    kinds: BTreeMap<String, KindEntry>,
}

impl UnitRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in kinds
    pub fn with_builtins() -> Self {
        Self::new()
            .with_kind("noop", "Passes immediately, optional 'message'", || {
                Box::new(NoopUnit)
            })
            .with_kind("sleep", "Sleeps for 'millis' milliseconds", || {
                Box::new(SleepUnit)
            })
            .with_kind("fail", "Always fails with 'message'", || Box::new(FailUnit))
            .with_kind(
                "command",
                "Runs 'command' with 'args' and checks the exit code",
                || Box::new(CommandUnit::default()),
            )
            .with_kind(
                "http",
                "Requests 'url' and checks 'expectStatus'",
                || Box::new(HttpCheckUnit::default()),
            )
    }

    /// Register an implementation under a unit id
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Unit> + Send + Sync + 'static,
    {
        self.units.insert(id.into(), Arc::new(factory));
    }

    /// Register an implementation under a kind name
    pub fn register_kind<F>(&mut self, kind: impl Into<String>, description: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Unit> + Send + Sync + 'static,
    {
        self.kinds.insert(
            kind.into(),
            KindEntry {
                description: description.into(),
                factory: Arc::new(factory),
            },
        );
    }

    pub fn with_unit<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Unit> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    pub fn with_kind<F>(mut self, kind: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Unit> + Send + Sync + 'static,
    {
        self.register_kind(kind, description, factory);
        self
    }

    /// Registered kinds with their descriptions, sorted by name
    pub fn kinds(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.kinds
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
    }

    /// Registered unit ids, sorted
    pub fn unit_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.units.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Check that a unit id resolves without building it
    pub fn can_resolve(&self, id: &str, inputs: &Inputs) -> Result<(), ResolutionError> {
        self.factory(id, inputs).map(|_| ())
    }

    /// Build a fresh instance for `id`. An id registration wins over the
    /// `kind` input.
    pub fn resolve(&self, id: &str, inputs: &Inputs) -> Result<Box<dyn Unit>, ResolutionError> {
        self.factory(id, inputs).map(|factory| factory())
    }

    fn factory(&self, id: &str, inputs: &Inputs) -> Result<&UnitFactory, ResolutionError> {
        if let Some(factory) = self.units.get(id) {
            return Ok(factory);
        }

        match inputs.get(KIND_INPUT) {
            None | Some(serde_json::Value::Null) => Err(ResolutionError::NotFound(id.to_string())),
            Some(serde_json::Value::String(kind)) => self
                .kinds
                .get(kind)
                .map(|entry| &entry.factory)
                .ok_or_else(|| ResolutionError::UnknownKind {
                    id: id.to_string(),
                    kind: kind.clone(),
                }),
            Some(_) => Err(ResolutionError::InvalidKind(id.to_string())),
        }
    }
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("units", &self.unit_ids())
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitContext;
    use serde_json::json;

    struct Named(&'static str);

    impl Unit for Named {
        fn name(&self) -> Option<String> {
            Some(self.0.to_string())
        }

        fn run(&mut self, _ctx: &mut UnitContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn inputs(value: serde_json::Value) -> Inputs {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Inputs::new(),
        }
    }

    #[test]
    fn test_resolve_by_id_wins_over_kind() {
        let registry = UnitRegistry::with_builtins().with_unit("1001", || Box::new(Named("backup")));

        let unit = registry
            .resolve("1001", &inputs(json!({ "kind": "noop" })))
            .unwrap();
        assert_eq!(unit.name().as_deref(), Some("backup"));
    }

    #[test]
    fn test_resolve_by_kind() {
        let registry = UnitRegistry::with_builtins();
        assert!(registry
            .resolve("42", &inputs(json!({ "kind": "sleep", "millis": 1 })))
            .is_ok());
    }

    #[test]
    fn test_resolution_errors() {
        let registry = UnitRegistry::with_builtins();

        assert_eq!(
            registry.resolve("42", &Inputs::new()).err(),
            Some(ResolutionError::NotFound("42".to_string()))
        );
        assert_eq!(
            registry
                .resolve("42", &inputs(json!({ "kind": "quantum" })))
                .err(),
            Some(ResolutionError::UnknownKind {
                id: "42".to_string(),
                kind: "quantum".to_string()
            })
        );
        assert_eq!(
            registry.resolve("42", &inputs(json!({ "kind": 7 }))).err(),
            Some(ResolutionError::InvalidKind("42".to_string()))
        );
    }

    #[test]
    fn test_builtin_kinds_listed_sorted() {
        let registry = UnitRegistry::with_builtins();
        let kinds: Vec<&str> = registry.kinds().map(|(name, _)| name).collect();
        assert_eq!(kinds, vec!["command", "fail", "http", "noop", "sleep"]);
    }

    #[test]
    fn test_every_resolution_is_a_fresh_instance() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let registry = UnitRegistry::new().with_unit("7", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(Named("x"))
        });

        registry.resolve("7", &Inputs::new()).unwrap();
        registry.resolve("7", &Inputs::new()).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
