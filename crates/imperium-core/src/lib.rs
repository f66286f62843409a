//! Imperium core types
//!
//! Shared vocabulary for the intent-to-enforcement pipeline: parsed intents,
//! policies, and the error type used across the workspace.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    EnforcementPlane, EnforcementResult, IntentType, ParsedIntent, Policy, PolicyType,
};
