//! Group (testset) models
//!
//! A normalized run plan: groups in configuration order, each with its
//! concurrency settings, skip rules and ordered units.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::units::Inputs;

/// Values treated as "not set" when deriving a group name
const IGNORE_VALUES: &[&str] = &["none", "na", "<notset>", "null"];

/// Composite key a group name can be derived from
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    /// Domain or product category
    pub product: String,
    /// Applicable platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Optional version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional extra property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl GroupKey {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            ..Default::default()
        }
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Join the set parts with `_`, e.g. `FileSystem_WINDOWS_v11_ONEPASS`
    pub fn name(&self) -> String {
        let parts = [
            Some(self.product.as_str()),
            self.platform.as_deref(),
            self.version.as_deref(),
            self.property.as_deref(),
        ];

        parts
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| is_set(p))
            .collect::<Vec<_>>()
            .join("_")
    }
}

fn is_set(value: &str) -> bool {
    !value.is_empty() && !IGNORE_VALUES.contains(&value.to_lowercase().as_str())
}

/// One unit of a group as declared in configuration
#[derive(Clone, Debug, PartialEq)]
pub struct UnitSpec {
    pub id: String,
    pub inputs: Inputs,
}

/// A normalized group definition
#[derive(Clone, Debug, PartialEq)]
pub struct GroupDefinition {
    pub name: String,
    pub key: Option<GroupKey>,
    /// Declared thread count (already validated as positive)
    pub thread_count: usize,
    pub parallel: bool,
    pub report_externally: bool,
    pub skip_if_group_failed: Vec<String>,
    pub skip_if_unit_failed: Vec<String>,
    pub units: Vec<UnitSpec>,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
            thread_count: 1,
            parallel: false,
            report_externally: false,
            skip_if_group_failed: Vec::new(),
            skip_if_unit_failed: Vec::new(),
            units: Vec::new(),
        }
    }

    pub fn with_unit(mut self, id: impl Into<String>, inputs: Inputs) -> Self {
        self.units.push(UnitSpec {
            id: id.into(),
            inputs,
        });
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.thread_count = threads.max(1);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn report_externally(mut self) -> Self {
        self.report_externally = true;
        self
    }

    pub fn skip_if_group_failed(mut self, group: impl Into<String>) -> Self {
        self.skip_if_group_failed.push(group.into());
        self
    }

    pub fn skip_if_unit_failed(mut self, unit_id: impl Into<String>) -> Self {
        self.skip_if_unit_failed.push(unit_id.into());
        self
    }

    /// Thread count the configuration asks for: the unit count when parallel
    /// execution is on, the declared count otherwise.
    pub fn configured_threads(&self) -> usize {
        if self.parallel {
            self.units.len().max(1)
        } else {
            self.thread_count.max(1)
        }
    }

    /// Worker count for a queue holding `queued` units; never more workers
    /// than items and never less than one.
    pub fn effective_threads(&self, queued: usize) -> usize {
        self.configured_threads().min(queued).max(1)
    }
}

/// Normalized input for one scheduler run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunPlan {
    pub groups: IndexMap<String, GroupDefinition>,
    /// Maximum number of groups executing at the same time
    pub group_threads: usize,
    pub controller: Option<String>,
    pub unit_filter: Vec<String>,
    pub group_filter: Vec<String>,
}

impl RunPlan {
    pub fn new() -> Self {
        Self {
            group_threads: 1,
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: GroupDefinition) -> Self {
        self.groups.insert(group.name.clone(), group);
        self
    }

    pub fn group(&self, name: &str) -> Option<&GroupDefinition> {
        self.groups.get(name)
    }

    /// Case-insensitive group filter check; an empty filter selects all
    pub fn group_selected(&self, name: &str) -> bool {
        self.group_filter.is_empty()
            || self
                .group_filter
                .iter()
                .any(|g| g.eq_ignore_ascii_case(name))
    }

    /// Exact unit filter check; an empty filter selects all
    pub fn unit_selected(&self, unit_id: &str) -> bool {
        self.unit_filter.is_empty() || self.unit_filter.iter().any(|u| u == unit_id)
    }

    /// Groups that must drain before `name` starts: those it names in
    /// `skip_if_group_failed` and every other group holding a unit it names
    /// in `skip_if_unit_failed`.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        let Some(group) = self.groups.get(name) else {
            return Vec::new();
        };

        let mut deps: Vec<&str> = group
            .skip_if_group_failed
            .iter()
            .map(String::as_str)
            .collect();
        for other in self.groups.values() {
            if other.name == name || deps.contains(&other.name.as_str()) {
                continue;
            }
            let holds_gate_unit = other
                .units
                .iter()
                .any(|unit| group.skip_if_unit_failed.contains(&unit.id));
            if holds_gate_unit {
                deps.push(other.name.as_str());
            }
        }
        deps
    }

    /// Split the selected groups into execution waves.
    ///
    /// A group lands in the first wave after every group it depends on (see
    /// [`RunPlan::dependencies`]). Within a wave groups keep their
    /// configuration order. Dependencies that are not selected impose no
    /// ordering. Returns `Err` with the names involved if a cycle remains.
    pub fn execution_waves(&self, selected: &[&str]) -> Result<Vec<Vec<String>>, Vec<String>> {
        let selected: Vec<&str> = self
            .groups
            .keys()
            .map(String::as_str)
            .filter(|name| selected.contains(name))
            .collect();
        let selected_set: HashSet<&str> = selected.iter().copied().collect();
        let dependencies: IndexMap<&str, Vec<&str>> = selected
            .iter()
            .map(|name| {
                let deps = self
                    .dependencies(name)
                    .into_iter()
                    .filter(|dep| selected_set.contains(dep))
                    .collect();
                (*name, deps)
            })
            .collect();

        let mut done: HashSet<&str> = HashSet::new();
        let mut remaining = selected;
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&str>, Vec<&str>) =
                remaining.iter().copied().partition(|name| {
                    dependencies[*name].iter().all(|dep| done.contains(dep))
                });

            if ready.is_empty() {
                return Err(blocked.into_iter().map(str::to_string).collect());
            }

            done.extend(ready.iter().copied());
            waves.push(ready.into_iter().map(str::to_string).collect());
            remaining = blocked;
        }

        Ok(waves)
    }

    pub fn unit_count(&self) -> usize {
        self.groups.values().map(|g| g.units.len()).sum()
    }
}
