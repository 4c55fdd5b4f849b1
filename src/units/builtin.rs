//! Simple built-in unit kinds

use anyhow::Result;
use std::thread;
use std::time::Duration;

use super::{Unit, UnitContext};

/// Passes immediately
pub struct NoopUnit;

impl Unit for NoopUnit {
    fn run(&mut self, ctx: &mut UnitContext) -> Result<()> {
        if let Some(message) = ctx.input_str("message").map(str::to_string) {
            ctx.set_message(message);
        }
        Ok(())
    }
}

/// Blocks the worker for `millis` milliseconds
pub struct SleepUnit;

impl Unit for SleepUnit {
    fn required_inputs(&self) -> &[&str] {
        &["millis"]
    }

    fn run(&mut self, ctx: &mut UnitContext) -> Result<()> {
        let millis = ctx
            .input_u64("millis")
            .ok_or_else(|| anyhow::anyhow!("input 'millis' must be a non-negative integer"))?;
        thread::sleep(Duration::from_millis(millis));
        ctx.set_message(format!("slept {millis}ms"));
        Ok(())
    }
}

/// Always fails
pub struct FailUnit;

impl Unit for FailUnit {
    fn run(&mut self, ctx: &mut UnitContext) -> Result<()> {
        let message = ctx.input_str("message").unwrap_or("unit configured to fail");
        anyhow::bail!("{message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Inputs;
    use serde_json::json;

    fn context(inputs: serde_json::Value) -> UnitContext {
        let inputs: Inputs = serde_json::from_value(inputs).unwrap();
        UnitContext::new("G", "1", inputs)
    }

    #[test]
    fn test_noop_passes_with_message() {
        let mut ctx = context(json!({ "message": "all good" }));
        NoopUnit.run(&mut ctx).unwrap();
        assert_eq!(ctx.message(), Some("all good"));
    }

    #[test]
    fn test_sleep_requires_millis() {
        let mut ctx = context(json!({ "millis": "soon" }));
        assert!(SleepUnit.run(&mut ctx).is_err());

        let mut ctx = context(json!({ "millis": 5 }));
        SleepUnit.run(&mut ctx).unwrap();
        assert_eq!(ctx.message(), Some("slept 5ms"));
    }

    #[test]
    fn test_fail_uses_message() {
        let mut ctx = context(json!({ "message": "disk full" }));
        let err = FailUnit.run(&mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }
}
