//! Bidirectional rule-based conversion of checkpoint and config stores.
//!
//! A converter declares a pair of formats and an ordered tree of rules. Each
//! rule is a sequence of [`Segment`]s compiled into one anchored regex per
//! side, plus an action: rename, constant assertion, custom transformation,
//! or delegation to a nested rule set. The engine walks every source key,
//! lets the first matching rule handle it, and reports keys no rule claims.
//!
//! # Quick start
//!
//! ```rust
//! use ckpt_common::{NamedValueStore, Side};
//! use ckpt_rules::{ActionContext, ConversionRule, RuleAction, RuleSet, apply_rules};
//! use ckpt_rules::segment::{divergent, shared};
//!
//! let rules = RuleSet::new(vec![
//!     ConversionRule::new(
//!         vec![divergent("n_embd", "hidden_size")],
//!         RuleAction::Rename,
//!     )?,
//!     ConversionRule::new(
//!         vec![divergent("h", "layers"), shared(r"\.\d+\."), divergent("ln_1", "norm1"), shared(r"\.weight")],
//!         RuleAction::Rename,
//!     )?,
//! ])?;
//!
//! let source: NamedValueStore = [("n_embd", 256i64), ("h.3.ln_1.weight", 1)].into_iter().collect();
//! let mut target = NamedValueStore::new();
//! apply_rules(&rules, &source, &mut target, &ActionContext::new(Side::Left, None), false)?;
//!
//! assert!(target.contains_key("hidden_size"));
//! assert!(target.contains_key("layers.3.norm1.weight"));
//! # Ok::<(), ckpt_common::ConversionError>(())
//! ```

pub mod action;
pub mod checkpoint;
pub mod compose;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod rule;
pub mod rule_set;
pub mod segment;

pub use action::{
    ActionContext, ActionFn, ConfigPair, ConstantAssertion, KeyMatch, RuleAction, assert_constant,
    replace_key,
};
pub use checkpoint::CheckpointConverter;
pub use compose::{PrefixCompat, Reformatted};
pub use config::{ConfigConverter, apply_defaults, backfill_constants};
pub use engine::{ApplyReport, apply_rules};
pub use pipeline::{Converted, convert_with_config};
pub use rule::ConversionRule;
pub use rule_set::{Resolved, RuleSet};
pub use segment::{Segment, divergent, shared};
