//! Automation worker: consumes `job_application` tasks, drives a browser
//! session through the posting's form, and publishes exactly one terminal
//! outcome per task.

pub mod config;
pub mod form;
pub mod heartbeat;
pub mod outcome;
pub mod runner;
pub mod session;
pub mod stagehand;
