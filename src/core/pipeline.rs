//! Pipeline domain model

use crate::core::error::EngineError;
use crate::core::step::StepMeta;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A directed edge carrying rows from one step to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub from: String,
    pub to: String,
    pub enabled: bool,
}

impl Hop {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            enabled: true,
        }
    }
}

fn default_row_set_size() -> usize {
    10_000
}

fn default_input_block_size() -> usize {
    500
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_safe_mode() -> bool {
    true
}

/// Engine tuning shared by every step of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Capacity of every row set
    #[serde(default = "default_row_set_size")]
    pub row_set_size: usize,

    /// Rows read from one input before switching to the next
    #[serde(default = "default_input_block_size")]
    pub input_block_size: usize,

    /// Wait on an empty input before trying the next one, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Log progress every this many rows per step, 0 disables it
    #[serde(default)]
    pub feedback_size: u64,

    /// Check that all inputs of a step deliver the same row layout
    #[serde(default = "default_safe_mode")]
    pub safe_mode: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            row_set_size: default_row_set_size(),
            input_block_size: default_input_block_size(),
            poll_interval_ms: default_poll_interval_ms(),
            feedback_size: 0,
            safe_mode: default_safe_mode(),
        }
    }
}

/// A pipeline definition: steps connected by hops
#[derive(Debug, Clone, Default)]
pub struct PipelineMeta {
    /// Pipeline name
    pub name: String,

    pub description: Option<String>,

    /// Pipeline scoped variables
    pub variables: HashMap<String, String>,

    pub settings: EngineSettings,

    steps: Vec<StepMeta>,

    hops: Vec<Hop>,
}

impl PipelineMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_step(mut self, step: StepMeta) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_hop(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.hops.push(Hop::new(from, to));
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn add_step(&mut self, step: StepMeta) {
        self.steps.push(step);
    }

    pub fn add_hop(&mut self, hop: Hop) {
        self.hops.push(hop);
    }

    pub fn steps(&self) -> &[StepMeta] {
        &self.steps
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&StepMeta> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Steps receiving normal rows from `name`, in hop order
    pub fn next_steps(&self, name: &str) -> Vec<&StepMeta> {
        self.hops
            .iter()
            .filter(|h| h.enabled && h.from == name)
            .filter(|h| self.step(name).and_then(|s| s.error_target()) != Some(h.to.as_str()))
            .filter_map(|h| self.step(&h.to))
            .collect()
    }

    /// Steps feeding `name`, including steps sending it their error rows
    pub fn previous_steps(&self, name: &str) -> Vec<&StepMeta> {
        let mut previous: Vec<&StepMeta> = self
            .hops
            .iter()
            .filter(|h| h.enabled && h.to == name)
            .filter_map(|h| self.step(&h.from))
            .collect();
        for step in &self.steps {
            if step.error_target() == Some(name) && !previous.iter().any(|p| p.name == step.name) {
                previous.push(step);
            }
        }
        previous
    }

    /// Validates names, copies, hops and the absence of cycles
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(EngineError::DuplicateStep(step.name.clone()));
            }
            if step.copies == 0 {
                return Err(EngineError::InvalidCopies(step.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for hop in &self.hops {
            for end in [&hop.from, &hop.to] {
                if !names.contains(end.as_str()) {
                    return Err(EngineError::UnknownHopStep {
                        from: hop.from.clone(),
                        to: hop.to.clone(),
                        missing: end.clone(),
                    });
                }
            }
            if !seen.insert((hop.from.as_str(), hop.to.as_str())) {
                return Err(EngineError::DuplicateHop {
                    from: hop.from.clone(),
                    to: hop.to.clone(),
                });
            }
        }

        for step in &self.steps {
            if let Some(target) = step.error_target() {
                if !names.contains(target) {
                    return Err(EngineError::UnknownErrorTarget {
                        step: step.name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        self.execution_order().map(|_| ())
    }

    /// Steps in topological order, producers before consumers
    ///
    /// Ties keep the order in which steps were defined.
    pub fn execution_order(&self) -> Result<Vec<&StepMeta>, EngineError> {
        let mut result = Vec::with_capacity(self.steps.len());
        let mut visited = HashSet::new();
        let mut in_progress = HashSet::new();

        for step in &self.steps {
            self.visit(&step.name, &mut visited, &mut in_progress, &mut result)?;
        }

        result.reverse();
        Ok(result)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        visited: &mut HashSet<String>,
        in_progress: &mut HashSet<String>,
        result: &mut Vec<&'a StepMeta>,
    ) -> Result<(), EngineError> {
        if visited.contains(name) {
            return Ok(());
        }
        if !in_progress.insert(name.to_string()) {
            return Err(EngineError::CycleDetected(name.to_string()));
        }

        if let Some(step) = self.step(name) {
            let mut downstream: Vec<&str> = self
                .hops
                .iter()
                .filter(|h| h.enabled && h.from == name)
                .map(|h| h.to.as_str())
                .collect();
            if let Some(target) = step.error_target() {
                downstream.push(target);
            }
            // reversed so that the final reversal keeps definition order
            for next in downstream.into_iter().rev() {
                self.visit(next, visited, in_progress, result)?;
            }
            in_progress.remove(name);
            visited.insert(name.to_string());
            result.push(step);
        }

        Ok(())
    }
}
