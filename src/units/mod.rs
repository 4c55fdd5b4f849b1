//! Units of work executed by the scheduler
//!
//! A unit goes through `setup`, `run` and `teardown`, each receiving the
//! unit's [`UnitContext`]. Implementations are looked up through the
//! [`UnitRegistry`], either by unit id or by the reserved `kind` input.
//!
//! ## Built-in kinds
//!
//! - `noop` - passes immediately
//! - `sleep` - sleeps for `millis`
//! - `fail` - always fails with `message`
//! - `command` - runs a process and checks its exit code
//! - `http` - sends a request and checks the response status

mod builtin;
mod command;
mod context;
mod http;
mod registry;

pub use builtin::{FailUnit, NoopUnit, SleepUnit};
pub use command::CommandUnit;
pub use context::UnitContext;
pub use http::HttpCheckUnit;
pub use registry::{ResolutionError, UnitFactory, UnitRegistry, KIND_INPUT};

use anyhow::Result;
use thiserror::Error;

/// Named inputs of a unit
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// A unit is missing inputs it declares as required
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("missing required input(s): {}", missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<String>,
}

/// One independently schedulable piece of work
pub trait Unit: Send {
    /// Human-readable name, used in reports when set
    fn name(&self) -> Option<String> {
        None
    }

    /// Inputs that must be present (and not null) before the unit starts
    fn required_inputs(&self) -> &[&str] {
        &[]
    }

    /// Check the declared inputs against what the configuration provides
    fn validate_inputs(&self, inputs: &Inputs) -> Result<(), ValidationError> {
        let missing: Vec<String> = self
            .required_inputs()
            .iter()
            .filter(|name| inputs.get(**name).map_or(true, |v| v.is_null()))
            .map(|name| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { missing })
        }
    }

    fn setup(&mut self, _ctx: &mut UnitContext) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, ctx: &mut UnitContext) -> Result<()>;

    fn teardown(&mut self, _ctx: &mut UnitContext) -> Result<()> {
        Ok(())
    }
}
