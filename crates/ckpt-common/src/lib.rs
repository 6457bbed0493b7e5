//! Common types for checkpoint conversion
//!
//! This crate provides the foundational types shared by the rule engine and
//! the per-architecture converters: the ordered key/value store that holds
//! one side of a checkpoint or config record, the value type stored in it,
//! format identifiers, and the conversion error type.

pub mod error;
pub mod format;
pub mod io;
pub mod store;
pub mod value;

pub use error::*;
pub use format::{FormatVersions, Side};
pub use store::NamedValueStore;
pub use value::Value;
