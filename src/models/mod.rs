//! Data models for testset execution
//!
//! This module contains the run plan and result structures shared by the
//! scheduler, reporters and output formatters.

mod group;
mod result;

pub use group::{GroupDefinition, GroupKey, RunPlan, UnitSpec};
pub use result::{
    aggregate_status, GroupReport, ResultRecord, RunReport, UnitState, UnitStatus, NO_REASON,
};
