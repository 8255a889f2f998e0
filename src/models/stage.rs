//! # Stage Descriptors
//!
//! Part of an externally supplied workflow: which task type a stage runs and
//! how its task list is produced.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a stage's task list is produced
///
/// SINGLE and FAN_OUT stages ask the workflow for their task parameters.
/// FAN_IN stages are synthesized by the coordinator from the previous
/// stage's results and never consult the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Parallelism {
    Single,
    FanOut,
    FanIn,
}

impl Parallelism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::FanOut => "fan_out",
            Self::FanIn => "fan_in",
        }
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// 1-based stage number
    pub stage_number: i32,
    pub task_type: String,
    pub parallelism: Parallelism,
}

impl StageDescriptor {
    pub fn new(stage_number: i32, task_type: impl Into<String>, parallelism: Parallelism) -> Self {
        Self {
            stage_number,
            task_type: task_type.into(),
            parallelism,
        }
    }

    pub fn single(stage_number: i32, task_type: impl Into<String>) -> Self {
        Self::new(stage_number, task_type, Parallelism::Single)
    }

    pub fn fan_out(stage_number: i32, task_type: impl Into<String>) -> Self {
        Self::new(stage_number, task_type, Parallelism::FanOut)
    }

    pub fn fan_in(stage_number: i32, task_type: impl Into<String>) -> Self {
        Self::new(stage_number, task_type, Parallelism::FanIn)
    }
}

/// Result of trying to take over finalization of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageClaim {
    /// Caller holds the finalization lease and must finalize or release it
    Claimed,
    /// Another caller holds an unexpired lease
    Held,
    /// The stage was already finalized
    Finalized,
    /// Tasks of the stage are still outstanding
    Outstanding,
}
