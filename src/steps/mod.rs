//! Step capability contract and the built-in step types
//!
//! A step type implements [`Step`]. The engine creates one instance per copy,
//! binds it to the layout of its first input row, feeds it rows one at a
//! time and flushes it once its input is exhausted. Step types are looked up
//! by name in a [`StepRegistry`].

pub mod dummy;
pub mod filter_rows;
pub mod row_generator;
pub mod select_values;
pub mod set_variables;
pub mod unique_rows;

use crate::core::error::{EngineError, StepError};
use crate::core::messages::MessageCatalog;
use crate::core::row::{Row, RowMeta};
use crate::core::step::StepMeta;
use crate::core::variables::VariableSpace;
use crate::execution::executor::{ExecutionUnit, StepExecutionUnit, UnitWiring};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::sync::Arc;

/// Whether a source step has more rows to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generate {
    More,
    Done,
}

/// The capabilities every step type provides
///
/// Only `init` and `bind` are mandatory. Transform steps override
/// [`Step::transform`], source steps (those without input hops) override
/// [`Step::generate`].
pub trait Step: Send + Sized + 'static {
    /// Type-specific configuration, read from the step's `config` mapping
    type Config: DeserializeOwned + Send + Sync + 'static;

    /// Checks the configuration before any row flows
    fn validate(_config: &Self::Config, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Creates the per-copy instance
    fn init(config: &Arc<Self::Config>, ctx: &StepContext) -> Result<Self, StepError>;

    /// Resolves field references against the input layout and returns the output layout
    ///
    /// Called once, before the first row is processed. Source steps see an
    /// empty input layout.
    fn bind(&mut self, input: &RowMeta, ctx: &StepContext) -> Result<RowMeta, StepError>;

    /// Processes one input row, writing zero or more rows to `out`
    fn transform(&mut self, _row: &Row, ctx: &StepContext, _out: &mut RowSink) -> Result<(), StepError> {
        Err(StepError::Config(format!(
            "step '{}' does not accept input rows",
            ctx.step_name()
        )))
    }

    /// Produces rows for a step without inputs
    fn generate(&mut self, _ctx: &StepContext, _out: &mut RowSink) -> Result<Generate, StepError> {
        Ok(Generate::Done)
    }

    /// Emits buffered rows after the last input row
    fn flush(&mut self, _ctx: &StepContext, _out: &mut RowSink) -> Result<(), StepError> {
        Ok(())
    }

    /// Releases resources; called once after the copy's thread finished
    fn dispose(self, _ctx: &StepContext) {}
}

/// Rows written by a step during one call
#[derive(Debug, Default)]
pub struct RowSink {
    rows: Vec<(Option<String>, Row)>,
}

impl RowSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a row to the step's normal outputs
    pub fn put(&mut self, row: Row) {
        self.rows.push((None, row));
    }

    /// Sends a row to one specific downstream step
    pub fn put_to(&mut self, target: impl Into<String>, row: Row) {
        self.rows.push((Some(target.into()), row));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(|(_, row)| row)
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
    }

    pub(crate) fn take(&mut self) -> Vec<(Option<String>, Row)> {
        std::mem::take(&mut self.rows)
    }

    /// Hands the emptied buffer back to reuse its allocation
    pub(crate) fn recycle(&mut self, mut rows: Vec<(Option<String>, Row)>) {
        rows.clear();
        if self.rows.is_empty() {
            self.rows = rows;
        }
    }
}

/// What a step copy knows about its surroundings
#[derive(Debug, Clone)]
pub struct StepContext {
    step_name: String,
    copy: usize,
    copies: usize,
    pipeline_name: String,
    variables: Arc<VariableSpace>,
    messages: Arc<MessageCatalog>,
    targets: Vec<String>,
    handles_errors: bool,
}

impl StepContext {
    pub fn new(step_name: impl Into<String>, variables: Arc<VariableSpace>) -> Self {
        Self {
            step_name: step_name.into(),
            copy: 0,
            copies: 1,
            pipeline_name: String::new(),
            variables,
            messages: Arc::new(MessageCatalog::english()),
            targets: Vec::new(),
            handles_errors: false,
        }
    }

    pub fn with_copy(mut self, copy: usize, copies: usize) -> Self {
        self.copy = copy;
        self.copies = copies;
        self
    }

    pub fn with_pipeline_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = name.into();
        self
    }

    pub fn with_messages(mut self, messages: Arc<MessageCatalog>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_error_handling(mut self, enabled: bool) -> Self {
        self.handles_errors = enabled;
        self
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn copies(&self) -> usize {
        self.copies
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// The step copy's own scope
    pub fn variables(&self) -> &Arc<VariableSpace> {
        &self.variables
    }

    /// The scope shared by all steps of the pipeline
    pub fn pipeline_variables(&self) -> Arc<VariableSpace> {
        self.variables
            .parent()
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.variables))
    }

    pub fn substitute(&self, text: &str) -> String {
        self.variables.substitute(text)
    }

    pub fn message(&self, key: &str, args: &[&dyn Display]) -> String {
        self.messages.get(key, args)
    }

    /// Names of the steps receiving this step's normal output
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.iter().any(|t| t == name)
    }

    /// Whether per-row failures become error rows
    pub fn handles_errors(&self) -> bool {
        self.handles_errors
    }
}

impl Display for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step_name, self.copy)
    }
}

/// Creates execution units for one step type
pub(crate) trait StepFactory: Send + Sync {
    fn check(&self, meta: &StepMeta, ctx: &StepContext) -> Result<(), EngineError>;

    fn create_units(
        &self,
        meta: &StepMeta,
        wirings: Vec<UnitWiring>,
    ) -> Result<Vec<Box<dyn ExecutionUnit>>, EngineError>;
}

struct TypedFactory<S>(PhantomData<fn() -> S>);

impl<S: Step> StepFactory for TypedFactory<S> {
    fn check(&self, meta: &StepMeta, ctx: &StepContext) -> Result<(), EngineError> {
        let config = parse_config::<S::Config>(meta)?;
        S::validate(&config, ctx).map_err(|e| EngineError::InvalidStepConfig {
            step: meta.name.clone(),
            reason: e.to_string(),
        })
    }

    fn create_units(
        &self,
        meta: &StepMeta,
        wirings: Vec<UnitWiring>,
    ) -> Result<Vec<Box<dyn ExecutionUnit>>, EngineError> {
        let config = Arc::new(parse_config::<S::Config>(meta)?);
        Ok(wirings
            .into_iter()
            .map(|wiring| {
                Box::new(StepExecutionUnit::<S>::new(Arc::clone(&config), wiring))
                    as Box<dyn ExecutionUnit>
            })
            .collect())
    }
}

fn parse_config<C: DeserializeOwned>(meta: &StepMeta) -> Result<C, EngineError> {
    // a step without a config block gets an empty mapping
    let value = match &meta.config {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other.clone(),
    };
    serde_yaml::from_value(value).map_err(|e| EngineError::InvalidStepConfig {
        step: meta.name.clone(),
        reason: e.to_string(),
    })
}

/// Step types known to an engine, keyed by type name
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    /// A registry without any step type
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in step type
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register::<dummy::Dummy>("dummy")
            .register::<filter_rows::FilterRows>("filter_rows")
            .register::<row_generator::RowGenerator>("row_generator")
            .register::<select_values::SelectValues>("select_values")
            .register::<set_variables::SetVariables>("set_variables")
            .register::<unique_rows::UniqueRows>("unique_rows");
        registry
    }

    /// Registers `S` under `type_name`, replacing an earlier registration
    pub fn register<S: Step>(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.factories
            .insert(type_name.into(), Arc::new(TypedFactory::<S>(PhantomData)));
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn step_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn factory(&self, meta: &StepMeta) -> Result<Arc<dyn StepFactory>, EngineError> {
        self.factories
            .get(&meta.step_type)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStepType {
                step: meta.name.clone(),
                step_type: meta.step_type.clone(),
            })
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}
