//! # Fan-In Synthesis
//!
//! A FAN_IN stage never consults its workflow: the coordinator builds its
//! single aggregation task from every completed result of the preceding stage.

use serde_json::{json, Value};

use crate::constants::FAN_IN_PATTERN;
use crate::models::Job;

/// Parameters of the aggregation task for FAN_IN `stage`
///
/// ```json
/// {
///   "results": [...],
///   "job_parameters": {...},
///   "aggregation": {"stage": 3, "source_stage": 2, "result_count": 5, "pattern": "fan_in"}
/// }
/// ```
pub fn aggregation_parameters(job: &Job, stage: i32, results: Vec<Value>) -> Value {
    let result_count = results.len();
    json!({
        "results": results,
        "job_parameters": job.parameters.clone(),
        "aggregation": {
            "stage": stage,
            "source_stage": stage - 1,
            "result_count": result_count,
            "pattern": FAN_IN_PATTERN,
        },
    })
}
