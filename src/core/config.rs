//! Pipeline configuration from YAML

use crate::core::pipeline::{EngineSettings, Hop, PipelineMeta};
use crate::core::step::{StepErrorMeta, StepMeta};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Pipeline scoped variables; scalars are turned into strings
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Engine tuning
    #[serde(default)]
    pub settings: EngineSettings,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,

    /// Connections between steps
    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name
    pub name: String,

    /// Registered step type
    #[serde(rename = "type")]
    pub step_type: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Number of parallel copies
    #[serde(default = "default_copies")]
    pub copies: usize,

    /// Type-specific settings
    #[serde(default)]
    pub config: Value,

    /// Round-robin rows over the targets instead of copying them
    #[serde(default)]
    pub distribute: bool,

    /// Partition rows for this step's copies by this field
    #[serde(default)]
    pub partition_by: Option<String>,

    #[serde(default)]
    pub error_handling: Option<StepErrorMeta>,
}

/// Hop configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopConfig {
    pub from: String,
    pub to: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_copies() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("Step names must not be empty");
            }
            if !seen.insert(step.name.as_str()) {
                anyhow::bail!("Duplicate step name: {}", step.name);
            }
            if step.copies == 0 {
                anyhow::bail!("Step '{}' must run with at least one copy", step.name);
            }
        }

        for hop in &self.hops {
            for end in [&hop.from, &hop.to] {
                if !seen.contains(end.as_str()) {
                    anyhow::bail!(
                        "Hop '{}' -> '{}' references non-existent step '{}'",
                        hop.from,
                        hop.to,
                        end
                    );
                }
            }
        }

        for step in &self.steps {
            if let Some(target) = step.error_handling.as_ref().and_then(|e| e.target.as_ref()) {
                if !seen.contains(target.as_str()) {
                    anyhow::bail!(
                        "Step '{}' sends error rows to non-existent step '{}'",
                        step.name,
                        target
                    );
                }
            }
        }

        if self.settings.row_set_size == 0 {
            anyhow::bail!("settings.row_set_size must be at least 1");
        }
        if self.settings.input_block_size == 0 {
            anyhow::bail!("settings.input_block_size must be at least 1");
        }

        // duplicate hops and cycles
        self.to_pipeline().validate()?;
        Ok(())
    }

    /// Variables with scalar values rendered as strings
    pub fn variables(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim_end()
                        .to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }

    /// Convert config to the pipeline domain model
    pub fn to_pipeline(&self) -> PipelineMeta {
        let mut pipeline = PipelineMeta::new(self.name.clone()).with_settings(self.settings.clone());
        pipeline.description = self.description.clone();
        pipeline.variables = self.variables();

        for step in &self.steps {
            let mut meta = StepMeta::new(step.name.clone(), step.step_type.clone())
                .with_copies(step.copies)
                .with_config(step.config.clone())
                .with_distribution(step.distribute);
            meta.partition_by = step.partition_by.clone();
            meta.error_handling = step.error_handling.clone();
            meta.description = step.description.clone();
            pipeline.add_step(meta);
        }

        for hop in &self.hops {
            pipeline.add_hop(Hop {
                from: hop.from.clone(),
                to: hop.to.clone(),
                enabled: hop.enabled,
            });
        }

        pipeline
    }
}
