//! Orchestration Integration Tests
//!
//! Drive jobs end to end through the coordinator entry points.

pub mod concurrency_test;
pub mod infrastructure_failure_test;
pub mod redelivery_test;
pub mod stage_flow_test;
