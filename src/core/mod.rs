//! Core domain models
//!
//! Values, rows and their metadata, the pipeline graph and its YAML
//! configuration, variable scopes and the error taxonomy.

pub mod config;
pub mod error;
pub mod format;
pub mod messages;
pub mod pipeline;
pub mod row;
pub mod state;
pub mod step;
pub mod value;
pub mod value_meta;
pub mod variables;

pub use error::*;
pub use messages::MessageCatalog;
pub use pipeline::*;
pub use row::*;
pub use state::*;
pub use step::*;
pub use value::*;
pub use value_meta::*;
pub use variables::VariableSpace;
