//! Module validation framework
//!
//! Provides manifest validation: id and version format plus dependency lists.

pub mod manifest_validator;

pub use manifest_validator::{ManifestValidator, ValidationResult};
