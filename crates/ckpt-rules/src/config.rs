//! Config record conversion

use crate::action::{ActionContext, RuleAction};
use crate::engine::apply_rules;
use crate::rule_set::RuleSet;
use ckpt_common::{FormatVersions, NamedValueStore, Result, Side, Value};
use tracing::{debug, info};

/// Converts config records between the two formats of a checkpoint converter.
///
/// Runs the same rule engine as checkpoint conversion, over scalar fields.
/// Fields of a side that nests them under a section (see
/// [`section`](Self::section)) are unwrapped before the rules run and
/// wrapped again on output; other sections of the record are not carried.
pub trait ConfigConverter: Send + Sync {
    fn formats(&self) -> (FormatVersions, FormatVersions);

    fn rules(&self) -> &RuleSet;

    /// Section holding the model fields on `side`, if any.
    fn section(&self, _side: Side) -> Option<&'static str> {
        None
    }

    /// Fill defaults and reject unsupported settings. Receives the unwrapped
    /// source fields.
    fn pre_convert(&self, _config: &mut NamedValueStore, _from: Side) -> Result<()> {
        Ok(())
    }

    /// Force derived target fields after the rules ran.
    fn post_convert(
        &self,
        _source: &NamedValueStore,
        _target: &mut NamedValueStore,
        _from: Side,
    ) -> Result<()> {
        Ok(())
    }

    fn convert(
        &self,
        config: &NamedValueStore,
        from: Side,
        drop_unmatched_keys: bool,
    ) -> Result<NamedValueStore> {
        self.convert_with_source(config, from, drop_unmatched_keys).map(|(_, target)| target)
    }

    /// Like [`convert`](Self::convert), but also returns the source record
    /// with the defaults from [`pre_convert`](Self::pre_convert) filled in,
    /// in the source's native layout (section included, other sections kept).
    ///
    /// Returns `(defaulted_source, target)`.
    fn convert_with_source(
        &self,
        config: &NamedValueStore,
        from: Side,
        drop_unmatched_keys: bool,
    ) -> Result<(NamedValueStore, NamedValueStore)> {
        let (left, right) = self.formats();
        info!(
            "Converting config {} -> {}",
            from.pick(left, right),
            from.other().pick(left, right)
        );

        let mut source = match self.section(from) {
            Some(section) => config.section(section),
            None => config.clone(),
        };
        self.pre_convert(&mut source, from)?;

        let mut target = NamedValueStore::with_capacity(source.len());
        let ctx = ActionContext::new(from, None);
        let report = apply_rules(self.rules(), &source, &mut target, &ctx, drop_unmatched_keys)?;
        let filled = backfill_constants(self.rules(), &mut target, from.other());
        self.post_convert(&source, &mut target, from)?;

        info!(
            "Config converted: {} fields renamed, {} validated, {} constants filled, {} dropped",
            report.converted,
            report.validated,
            filled,
            report.dropped.len()
        );

        let defaulted = match self.section(from) {
            Some(section) => {
                let mut full = config.clone();
                full.extend(source.into_section(section));
                full
            }
            None => source,
        };
        let target = match self.section(from.other()) {
            Some(section) => target.into_section(section),
            None => target,
        };
        Ok((defaulted, target))
    }
}

/// Insert every default whose key is absent from `config`.
pub fn apply_defaults<'a>(
    config: &mut NamedValueStore,
    defaults: impl IntoIterator<Item = (&'a str, Value)>,
) {
    for (key, value) in defaults {
        if !config.contains_key(key) {
            debug!("Defaulting config field {} to {:?}", key, value);
            config.insert(key, value);
        }
    }
}

/// Write the constants that `to` holds but the source never mentioned.
///
/// Only rules whose key is literal on `to` take part. Returns the number of
/// fields written.
pub fn backfill_constants(rules: &RuleSet, target: &mut NamedValueStore, to: Side) -> usize {
    let mut filled = 0;
    for rule in rules.rules() {
        let Some(RuleAction::Constant(assertion)) = rule.action() else {
            continue;
        };
        if assertion.side != to {
            continue;
        }
        let Some(key) = rule.literal_key(to) else {
            continue;
        };
        if !target.contains_key(&key) {
            target.insert(key, assertion.value.clone());
            filled += 1;
        }
    }
    filled
}
