//! Run input loading and normalization
//!
//! Parses the run document (JSON or YAML) and normalizes it into a
//! [`RunPlan`]. Every structural problem is reported as a [`ConfigError`]
//! before any queue is populated.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{GroupDefinition, GroupKey, RunPlan, UnitSpec};
use crate::units::Inputs;

/// Group name used for the legacy flat unit list
pub const DEFAULT_GROUP: &str = "default";

/// Fatal configuration problem
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("no groups defined (expected 'groups' or a legacy 'units' map)")]
    NoGroups,

    #[error("'groups' and legacy 'units' cannot be combined")]
    MixedForms,

    #[error("group #{0} has neither a name nor a usable key")]
    MissingGroupName(usize),

    #[error("group '{0}' is defined more than once")]
    DuplicateGroup(String),

    #[error("group '{group}' has invalid threadCount {value}; must be positive")]
    InvalidThreadCount { group: String, value: i64 },

    #[error("groupThreads must be positive")]
    InvalidGroupThreads,

    #[error("group '{0}' has no units")]
    EmptyGroup(String),

    #[error("group '{0}' contains a unit with an empty id")]
    EmptyUnitId(String),

    #[error("unit '{unit}' appears more than once in group '{group}'")]
    DuplicateUnit { group: String, unit: String },

    #[error("group '{group}' depends on unknown group '{dependency}'")]
    UnknownDependency { group: String, dependency: String },

    #[error("group '{0}' lists itself in skipIfGroupFailed")]
    SelfDependency(String),

    #[error("dependency cycle between groups: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

/// Run document as written by users
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunInput {
    /// Controller id forwarded to reporting sinks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    /// Maximum number of groups running at once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_threads: Option<usize>,
    /// Only these unit ids are enqueued
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unit_filter: Vec<String>,
    /// Only these groups are run (case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<GroupsInput>,
    /// Legacy flat unit list, run as a single group
    #[serde(default, alias = "testcases", skip_serializing_if = "Option::is_none")]
    pub units: Option<UnitsInput>,
    /// Thread count of the legacy group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<i64>,
    /// Parallel flag of the legacy group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_execution: Option<bool>,
}

/// Groups keyed by name, or a list of named/keyed entries
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum GroupsInput {
    Map(IndexMap<String, GroupInput>),
    List(Vec<GroupInput>),
}

/// One group definition
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupInput {
    /// Explicit name (list form)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Composite key the name is derived from when no name is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<GroupKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<i64>,
    #[serde(default)]
    pub parallel_execution: bool,
    #[serde(default)]
    pub report_externally: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_if_group_failed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_if_unit_failed: Vec<String>,
    #[serde(default)]
    pub units: UnitsInput,
}

/// Units keyed by id, or a list of `{ id, ...inputs }` entries
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum UnitsInput {
    Map(IndexMap<String, Option<Inputs>>),
    List(Vec<UnitEntry>),
}

impl Default for UnitsInput {
    fn default() -> Self {
        UnitsInput::Map(IndexMap::new())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct UnitEntry {
    pub id: String,
    #[serde(flatten)]
    pub inputs: Inputs,
}

impl UnitsInput {
    fn into_specs(self) -> Vec<UnitSpec> {
        match self {
            UnitsInput::Map(map) => map
                .into_iter()
                .map(|(id, inputs)| UnitSpec {
                    id,
                    inputs: inputs.unwrap_or_default(),
                })
                .collect(),
            UnitsInput::List(list) => list
                .into_iter()
                .map(|entry| UnitSpec {
                    id: entry.id,
                    inputs: entry.inputs,
                })
                .collect(),
        }
    }

    fn from_specs(specs: &[UnitSpec]) -> Self {
        UnitsInput::Map(
            specs
                .iter()
                .map(|u| (u.id.clone(), Some(u.inputs.clone())))
                .collect(),
        )
    }
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}

impl RunInput {
    /// Load a run document; YAML by extension, JSON otherwise with a YAML
    /// fallback for extensionless files
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
        let parsed = if is_yaml_file(path) {
            Self::from_yaml(&content)
        } else if is_json {
            Self::from_json(&content)
        } else {
            Self::from_json(&content).or_else(|_| Self::from_yaml(&content))
        };

        parsed.map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, String> {
        serde_json::from_str(content).map_err(|e| e.to_string())
    }

    pub fn from_yaml(content: &str) -> Result<Self, String> {
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// Normalize into a validated plan
    pub fn into_plan(self) -> Result<RunPlan, ConfigError> {
        let mut plan = RunPlan::new();
        plan.controller = self.controller;
        plan.unit_filter = self.unit_filter;
        plan.group_filter = self.group_filter;
        if let Some(threads) = self.group_threads {
            if threads == 0 {
                return Err(ConfigError::InvalidGroupThreads);
            }
            plan.group_threads = threads;
        }

        let entries: Vec<(Option<String>, GroupInput)> = match (self.groups, self.units) {
            (Some(_), Some(_)) => return Err(ConfigError::MixedForms),
            (None, None) => return Err(ConfigError::NoGroups),
            (None, Some(units)) => {
                debug!("Converting legacy unit list into group '{}'", DEFAULT_GROUP);
                let group = GroupInput {
                    thread_count: self.thread_count,
                    parallel_execution: self.parallel_execution.unwrap_or(false),
                    units,
                    ..Default::default()
                };
                vec![(Some(DEFAULT_GROUP.to_string()), group)]
            }
            (Some(GroupsInput::Map(map)), None) => {
                map.into_iter().map(|(name, g)| (Some(name), g)).collect()
            }
            (Some(GroupsInput::List(list)), None) => {
                list.into_iter().map(|g| (g.name.clone(), g)).collect()
            }
        };

        if entries.is_empty() {
            return Err(ConfigError::NoGroups);
        }

        for (idx, (name, input)) in entries.into_iter().enumerate() {
            let name = name
                .filter(|n| !n.trim().is_empty())
                .or_else(|| input.key.as_ref().map(GroupKey::name))
                .filter(|n| !n.is_empty())
                .ok_or(ConfigError::MissingGroupName(idx))?;

            if plan.groups.contains_key(&name) {
                return Err(ConfigError::DuplicateGroup(name));
            }
            let group = normalize_group(name, input)?;
            plan.groups.insert(group.name.clone(), group);
        }

        validate_dependencies(&plan)?;
        Ok(plan)
    }

    /// Normalized document for a plan, in the `groups` map form
    pub fn from_plan(plan: &RunPlan) -> Self {
        let groups = plan
            .groups
            .values()
            .map(|g| {
                let input = GroupInput {
                    name: None,
                    key: g.key.clone(),
                    thread_count: Some(g.thread_count as i64),
                    parallel_execution: g.parallel,
                    report_externally: g.report_externally,
                    skip_if_group_failed: g.skip_if_group_failed.clone(),
                    skip_if_unit_failed: g.skip_if_unit_failed.clone(),
                    units: UnitsInput::from_specs(&g.units),
                };
                (g.name.clone(), input)
            })
            .collect();

        Self {
            controller: plan.controller.clone(),
            group_threads: Some(plan.group_threads),
            unit_filter: plan.unit_filter.clone(),
            group_filter: plan.group_filter.clone(),
            groups: Some(GroupsInput::Map(groups)),
            ..Default::default()
        }
    }
}

fn normalize_group(name: String, input: GroupInput) -> Result<GroupDefinition, ConfigError> {
    let thread_count = match input.thread_count {
        None => 1,
        Some(value) if value > 0 => value as usize,
        Some(value) => return Err(ConfigError::InvalidThreadCount { group: name, value }),
    };

    let units = input.units.into_specs();
    if units.is_empty() {
        return Err(ConfigError::EmptyGroup(name));
    }

    let mut seen = HashSet::new();
    for unit in &units {
        if unit.id.trim().is_empty() {
            return Err(ConfigError::EmptyUnitId(name));
        }
        if !seen.insert(unit.id.as_str()) {
            return Err(ConfigError::DuplicateUnit {
                group: name,
                unit: unit.id.clone(),
            });
        }
    }

    if input.parallel_execution && input.thread_count.is_some() {
        warn!(
            "Group {} sets both threadCount and parallelExecution; using one thread per unit",
            name
        );
    }

    Ok(GroupDefinition {
        name,
        key: input.key,
        thread_count,
        parallel: input.parallel_execution,
        report_externally: input.report_externally,
        skip_if_group_failed: input.skip_if_group_failed,
        skip_if_unit_failed: input.skip_if_unit_failed,
        units,
    })
}

fn validate_dependencies(plan: &RunPlan) -> Result<(), ConfigError> {
    for group in plan.groups.values() {
        for dependency in &group.skip_if_group_failed {
            if dependency == &group.name {
                return Err(ConfigError::SelfDependency(group.name.clone()));
            }
            if !plan.groups.contains_key(dependency) {
                return Err(ConfigError::UnknownDependency {
                    group: group.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    let names: Vec<&str> = plan.groups.keys().map(String::as_str).collect();
    plan.execution_waves(&names)
        .map(|_| ())
        .map_err(ConfigError::DependencyCycle)
}

/// Load and normalize a run document in one step
pub fn load_plan(path: impl AsRef<Path>) -> Result<RunPlan, ConfigError> {
    RunInput::load(path)?.into_plan()
}

/// JSON Schema of the run document
pub fn run_input_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RunInput)
}
