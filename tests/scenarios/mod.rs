//! Scenario-based tests for rowflow

mod binding;
mod dedupe;
mod distribution;
mod error_rows;
mod failure_handling;
mod listeners;
mod stop;
mod variables;
mod yaml_pipelines;
