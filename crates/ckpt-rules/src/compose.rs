//! Version composition: newer formats expressed through older converters

use crate::action::{ActionContext, RuleAction};
use crate::checkpoint::CheckpointConverter;
use crate::config::ConfigConverter;
use crate::rule::ConversionRule;
use crate::rule_set::RuleSet;
use crate::segment::divergent;
use ckpt_common::{FormatVersions, NamedValueStore, Result, Side};
use std::sync::Arc;

/// A converter for a newer format pair that reuses an older converter.
///
/// Keys are matched against the inner rules as they are and, failing that,
/// after a fixed per-side prefix (one side's prefix may be empty). Hooks and
/// the config converter are the inner converter's.
pub struct PrefixCompat<C> {
    inner: C,
    formats: (FormatVersions, FormatVersions),
    note: Option<String>,
    rules: RuleSet,
}

impl<C: CheckpointConverter> PrefixCompat<C> {
    pub fn new(
        inner: C,
        formats: (FormatVersions, FormatVersions),
        left_prefix: &str,
        right_prefix: &str,
    ) -> Result<Self> {
        let shared = Arc::new(inner.rules().clone());
        let rules = RuleSet::new(vec![
            ConversionRule::new(vec![], RuleAction::Nested(shared.clone()))?,
            ConversionRule::new(vec![divergent(left_prefix, right_prefix)], RuleAction::Nested(shared))?,
        ])?;
        Ok(Self { inner, formats, note: None, rules })
    }

    /// Replace the inner converter's note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: CheckpointConverter> CheckpointConverter for PrefixCompat<C> {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        self.formats
    }

    fn converter_note(&self) -> String {
        self.note.clone().unwrap_or_else(|| self.inner.converter_note())
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn config_converter(&self) -> Option<Box<dyn ConfigConverter>> {
        let inner = self.inner.config_converter()?;
        Some(Box::new(Reformatted::new(inner, self.formats)))
    }

    fn pre_convert(&self, source: &mut NamedValueStore, ctx: &ActionContext<'_>) -> Result<()> {
        self.inner.pre_convert(source, ctx)
    }

    fn post_convert(
        &self,
        source: &NamedValueStore,
        target: &mut NamedValueStore,
        ctx: &ActionContext<'_>,
    ) -> Result<()> {
        self.inner.post_convert(source, target, ctx)
    }
}

/// A config converter re-declared for a newer format pair.
pub struct Reformatted {
    inner: Box<dyn ConfigConverter>,
    formats: (FormatVersions, FormatVersions),
}

impl Reformatted {
    pub fn new(inner: Box<dyn ConfigConverter>, formats: (FormatVersions, FormatVersions)) -> Self {
        Self { inner, formats }
    }
}

impl ConfigConverter for Reformatted {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        self.formats
    }

    fn rules(&self) -> &RuleSet {
        self.inner.rules()
    }

    fn section(&self, side: Side) -> Option<&'static str> {
        self.inner.section(side)
    }

    fn pre_convert(&self, config: &mut NamedValueStore, from: Side) -> Result<()> {
        self.inner.pre_convert(config, from)
    }

    fn post_convert(
        &self,
        source: &NamedValueStore,
        target: &mut NamedValueStore,
        from: Side,
    ) -> Result<()> {
        self.inner.post_convert(source, target, from)
    }
}
