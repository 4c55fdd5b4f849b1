//! Per-unit execution context
//!
//! Passed by reference through every lifecycle call so unit bodies never
//! need ambient, thread-keyed state.

use anyhow::{Context as _, Result};
use serde_json::Value;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;

use super::Inputs;

/// Execution context of one unit
#[derive(Debug)]
pub struct UnitContext {
    run_id: String,
    controller: String,
    group: String,
    unit_id: String,
    name: Option<String>,
    inputs: Inputs,
    log_dir: Option<PathBuf>,
    attachments: Vec<PathBuf>,
    message: Option<String>,
    runtime: Option<Handle>,
}

impl UnitContext {
    pub fn new(group: impl Into<String>, unit_id: impl Into<String>, inputs: Inputs) -> Self {
        Self {
            run_id: String::new(),
            controller: String::new(),
            group: group.into(),
            unit_id: unit_id.into(),
            name: None,
            inputs,
            log_dir: None,
            attachments: Vec::new(),
            message: None,
            runtime: None,
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>, controller: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self.controller = controller.into();
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn with_runtime(mut self, runtime: Option<Handle>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).filter(|v| !v.is_null())
    }

    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(Value::as_str)
    }

    /// Integer input; numeric strings are accepted too
    pub fn input_u64(&self, name: &str) -> Option<u64> {
        match self.input(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn input_bool(&self, name: &str) -> Option<bool> {
        match self.input(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.input_str(name)
            .with_context(|| format!("input '{name}' must be a string"))
    }

    /// String list input; a single string is treated as a one-item list
    pub fn input_list(&self, name: &str) -> Vec<String> {
        match self.input(name) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Result message reported if the unit passes
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn attach(&mut self, path: impl Into<PathBuf>) {
        self.attachments.push(path.into());
    }

    pub fn attachments(&self) -> &[PathBuf] {
        &self.attachments
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Create the unit log directory if one is configured
    pub fn ensure_log_dir(&self) -> Result<Option<&Path>> {
        match self.log_dir.as_deref() {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log dir: {}", dir.display()))?;
                Ok(Some(dir))
            }
            None => Ok(None),
        }
    }

    /// Drive a future to completion on the scheduler's async runtime
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        match &self.runtime {
            Some(handle) => Ok(handle.block_on(future)),
            None => anyhow::bail!(
                "unit '{}' needs an async runtime but none was configured",
                self.unit_id
            ),
        }
    }

    /// Split off what the record keeps once the unit is done
    pub(crate) fn finish(self) -> (Option<String>, Option<String>, Vec<PathBuf>) {
        (self.name, self.message, self.attachments)
    }
}
