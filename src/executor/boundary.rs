//! Failure boundary
//!
//! Runs one unit's lifecycle (resolve, validate, setup, run, teardown) and
//! turns every error or panic into a `FAILED` state. Nothing raised by a
//! unit escapes this module.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::UnitState;
use crate::units::{ResolutionError, Unit, UnitContext, UnitRegistry, ValidationError};

/// Message recorded when a fault cannot be rendered
pub const FALLBACK_MESSAGE: &str = "unit failed (fault message unavailable)";

/// Lifecycle phase of a unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Validate,
    Setup,
    Run,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Resolve => write!(f, "resolve"),
            Phase::Validate => write!(f, "validate"),
            Phase::Setup => write!(f, "setup"),
            Phase::Run => write!(f, "run"),
            Phase::Teardown => write!(f, "teardown"),
        }
    }
}

/// Fault contained at the unit boundary
#[derive(Error, Debug)]
pub enum UnitFault {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{error:#}")]
    Execution { phase: Phase, error: anyhow::Error },

    #[error("{phase} panicked: {message}")]
    Panic { phase: Phase, message: String },
}

impl UnitFault {
    pub fn phase(&self) -> Phase {
        match self {
            UnitFault::Resolution(_) => Phase::Resolve,
            UnitFault::Validation(_) => Phase::Validate,
            UnitFault::Execution { phase, .. } | UnitFault::Panic { phase, .. } => *phase,
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn guarded<T>(phase: Phase, f: impl FnOnce() -> Result<T, UnitFault>) -> Result<T, UnitFault> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(UnitFault::Panic {
            phase,
            message: panic_message(payload.as_ref()),
        })
    })
}

fn lifecycle(
    phase: Phase,
    unit: &mut dyn Unit,
    ctx: &mut UnitContext,
    call: fn(&mut dyn Unit, &mut UnitContext) -> anyhow::Result<()>,
) -> Result<(), UnitFault> {
    guarded(phase, || {
        call(unit, ctx).map_err(|error| UnitFault::Execution { phase, error })
    })
}

/// Render a fault, downgrading a panic during rendering to a warning
pub fn describe(fault: &UnitFault, state: &mut UnitState) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| fault.to_string())) {
        Ok(message) => message,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            warn!("Failed to format {} fault: {}", fault.phase(), detail);
            state.warn(format!("fault message unavailable: {detail}"));
            FALLBACK_MESSAGE.to_string()
        }
    }
}

fn record_fault(state: &mut UnitState, fault: UnitFault) {
    let message = describe(&fault, state);
    debug!("{} failed: {}", fault.phase(), message);
    state.fail(message);
}

/// Execute one unit inside the failure boundary.
///
/// Teardown runs whenever setup was attempted. If the unit already failed, a
/// teardown fault only adds a warning.
pub fn execute(registry: &UnitRegistry, ctx: &mut UnitContext, state: &mut UnitState) {
    let resolved = guarded(Phase::Resolve, || {
        registry
            .resolve(ctx.unit_id(), ctx.inputs())
            .map_err(UnitFault::from)
    });
    let mut unit = match resolved {
        Ok(unit) => unit,
        Err(fault) => return record_fault(state, fault),
    };

    if let Err(fault) = guarded(Phase::Validate, || {
        unit.validate_inputs(ctx.inputs()).map_err(UnitFault::from)
    }) {
        return record_fault(state, fault);
    }

    let primary = lifecycle(Phase::Setup, unit.as_mut(), ctx, |u, c| u.setup(c))
        .and_then(|()| lifecycle(Phase::Run, unit.as_mut(), ctx, |u, c| u.run(c)));
    let cleanup = lifecycle(Phase::Teardown, unit.as_mut(), ctx, |u, c| u.teardown(c));

    match (primary, cleanup) {
        (Ok(()), Ok(())) => {}
        (Err(fault), Ok(())) | (Ok(()), Err(fault)) => record_fault(state, fault),
        (Err(fault), Err(teardown)) => {
            record_fault(state, fault);
            let message = describe(&teardown, state);
            warn!("Teardown failed after unit failure: {}", message);
            state.warn(format!("teardown: {message}"));
        }
    }

    if ctx.name().is_none() {
        if let Ok(Some(name)) = panic::catch_unwind(AssertUnwindSafe(|| unit.name())) {
            ctx.set_name(name);
        }
    }
}
