//! Checkpoint converters

use crate::action::{ActionContext, ConfigPair};
use crate::config::ConfigConverter;
use crate::engine::apply_rules;
use crate::rule_set::RuleSet;
use ckpt_common::{FormatVersions, NamedValueStore, Result, Side};
use tracing::info;

/// Bridges one `(left, right)` pair of checkpoint formats in both directions.
///
/// Implementors supply the rule tree and, where a conversion is not a pure
/// key mapping, the pre/post hooks. Conversions share no state, so one
/// converter can serve many threads at once.
pub trait CheckpointConverter: Send + Sync {
    fn formats(&self) -> (FormatVersions, FormatVersions);

    /// Operator-facing description of the asymmetries between the formats.
    fn converter_note(&self) -> String;

    fn rules(&self) -> &RuleSet;

    /// Converter for the config records that accompany these checkpoints.
    fn config_converter(&self) -> Option<Box<dyn ConfigConverter>> {
        None
    }

    /// Runs before any rule. This is the only hook allowed to modify the
    /// source store (e.g. to alias tied weights).
    fn pre_convert(&self, _source: &mut NamedValueStore, _ctx: &ActionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Runs after every rule, to synthesize target-only entries.
    fn post_convert(
        &self,
        _source: &NamedValueStore,
        _target: &mut NamedValueStore,
        _ctx: &ActionContext<'_>,
    ) -> Result<()> {
        Ok(())
    }

    /// Convert `source` out of the `from` format.
    ///
    /// `source` is mutated by [`pre_convert`](Self::pre_convert) only.
    fn convert(
        &self,
        source: &mut NamedValueStore,
        from: Side,
        configs: Option<&ConfigPair>,
        drop_unmatched_keys: bool,
    ) -> Result<NamedValueStore> {
        let (left, right) = self.formats();
        info!(
            "Converting checkpoint {} -> {} ({} keys)",
            from.pick(left, right),
            from.other().pick(left, right),
            source.len()
        );

        let ctx = ActionContext::new(from, configs);
        self.pre_convert(source, &ctx)?;

        let mut target = NamedValueStore::with_capacity(source.len());
        let report = apply_rules(self.rules(), source, &mut target, &ctx, drop_unmatched_keys)?;
        self.post_convert(source, &mut target, &ctx)?;

        info!(
            "Checkpoint converted: {} keys converted, {} validated, {} dropped, {} written",
            report.converted,
            report.validated,
            report.dropped.len(),
            target.len()
        );
        Ok(target)
    }
}
