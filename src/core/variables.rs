//! Hierarchical variable scopes and `${NAME}` substitution

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub const INTERNAL_STEP_NAME: &str = "Internal.Step.Name";
pub const INTERNAL_STEP_COPY_NR: &str = "Internal.Step.CopyNr";
pub const INTERNAL_STEP_COPIES: &str = "Internal.Step.Copies";
pub const INTERNAL_PIPELINE_NAME: &str = "Internal.Pipeline.Name";
pub const INTERNAL_EXECUTION_ID: &str = "Internal.Pipeline.ExecutionId";

/// A scope of name/value pairs chained to an optional parent
///
/// Lookups walk up the chain, so a step scope sees the pipeline scope, which
/// in turn sees the process scope. Scopes are shared between step threads
/// and use interior locking.
#[derive(Debug, Default)]
pub struct VariableSpace {
    variables: RwLock<HashMap<String, String>>,
    parent: Option<Arc<VariableSpace>>,
}

impl VariableSpace {
    /// A root scope without variables
    pub fn root() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A root scope seeded with the process environment
    pub fn from_env() -> Arc<Self> {
        let scope = Self::default();
        {
            let mut vars = scope.write();
            vars.extend(std::env::vars());
        }
        Arc::new(scope)
    }

    /// A new empty scope whose lookups fall back to `parent`
    pub fn child_of(parent: &Arc<VariableSpace>) -> Arc<Self> {
        Arc::new(Self {
            variables: RwLock::new(HashMap::new()),
            parent: Some(Arc::clone(parent)),
        })
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.write().insert(name.into(), value.into());
    }

    pub fn set_all<I, K, V>(&self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut vars = self.write();
        for (name, value) in pairs {
            vars.insert(name.into(), value.into());
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.read().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn parent(&self) -> Option<&Arc<VariableSpace>> {
        self.parent.as_ref()
    }

    /// The top-most scope of the chain
    pub fn root_of(scope: &Arc<VariableSpace>) -> Arc<VariableSpace> {
        let mut current = Arc::clone(scope);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// Every visible variable, nearer scopes overriding farther ones
    pub fn snapshot(&self) -> HashMap<String, String> {
        let mut vars = self
            .parent
            .as_ref()
            .map(|parent| parent.snapshot())
            .unwrap_or_default();
        vars.extend(self.read().iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// Replaces `${NAME}` and `%%NAME%%` placeholders
    ///
    /// Unknown names are left untouched.
    pub fn substitute(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = find_placeholder(rest) {
            out.push_str(&rest[..start]);
            let candidate = &rest[start..];
            let (open, close) = if candidate.starts_with("${") {
                ("${", "}")
            } else {
                ("%%", "%%")
            };

            let body = &candidate[open.len()..];
            match body.find(close) {
                Some(end) if end > 0 => {
                    let name = &body[..end];
                    let consumed = open.len() + end + close.len();
                    match self.get(name) {
                        Some(value) => out.push_str(&value),
                        None => out.push_str(&candidate[..consumed]),
                    }
                    rest = &candidate[consumed..];
                }
                _ => {
                    out.push_str(open);
                    rest = body;
                }
            }
        }

        out.push_str(rest);
        out
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, String>> {
        self.variables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, String>> {
        self.variables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find_placeholder(text: &str) -> Option<usize> {
    match (text.find("${"), text.find("%%")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
