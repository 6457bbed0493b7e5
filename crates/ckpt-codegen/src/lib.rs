//! CodeGen checkpoint and config converters
//!
//! Bridges Hugging Face CodeGen checkpoints (`hf`) and Cerebras GPT-J style
//! checkpoints configured as CodeGen (`cs-1.7`, and `cs-1.8`/`cs-1.9` which
//! share one layout). The HF side packs the attention query, key and value
//! projections into one sharded tensor and registers mask/rotary buffers;
//! the CS side keeps separate projections and computes the buffers.
//!
//! Use [`registry::find`] to pick a converter by model name and formats, then
//! [`ckpt_rules::convert_with_config`] to convert a checkpoint with its
//! config record.

use ckpt_common::FormatVersions;

pub mod attention;
pub mod buffers;
pub mod config;
pub mod headless;
pub mod lm_head;
pub mod qkv;
pub mod registry;

pub use attention::AttentionConverter;
pub use config::CodegenConfigConverter;
pub use headless::HeadlessConverter;
pub use lm_head::LmHeadConverter;
pub use registry::{CODEGEN, CODEGEN_HEADLESS, ConverterInfo, describe, find};

/// Hugging Face transformers layout.
pub const HF: FormatVersions = FormatVersions::new(&["hf"]);
/// Cerebras model zoo 1.7 layout.
pub const CS17: FormatVersions = FormatVersions::new(&["cs-1.7"]);
/// Cerebras model zoo 1.8 and 1.9 layout.
pub const CS18: FormatVersions = FormatVersions::new(&["cs-1.8", "cs-1.9"]);
