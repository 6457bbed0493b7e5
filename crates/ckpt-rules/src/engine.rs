//! Rule application over a whole store

use crate::action::{ActionContext, KeyMatch, RuleAction, replace_key};
use crate::rule_set::RuleSet;
use ckpt_common::{ConversionError, NamedValueStore, Result};
use tracing::{debug, warn};

/// Accounting for one pass of [`apply_rules`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Source keys claimed by a converting rule.
    pub converted: usize,
    /// Source keys claimed by an existence-only rule.
    pub validated: usize,
    /// Source keys no rule claimed, dropped because the caller allowed it.
    pub dropped: Vec<String>,
}

/// Apply `rules` to every key of `source`, writing into `target`.
///
/// The source store is only read. Every source key must be claimed by
/// exactly one rule; otherwise the pass fails with
/// [`ConversionError::UnmatchedKey`] listing every unclaimed key, unless
/// `drop_unmatched_keys` is set.
pub fn apply_rules(
    rules: &RuleSet,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    ctx: &ActionContext<'_>,
    drop_unmatched_keys: bool,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    let mut unmatched = Vec::new();

    for key in source.keys() {
        let Some(resolved) = rules.resolve(key, ctx.from()) else {
            unmatched.push(key.to_string());
            continue;
        };
        let m = KeyMatch { old_key: key, new_key: &resolved.new_key };

        if resolved.rule.is_existence_check() {
            let before = target.len();
            if let Some(check) = resolved.rule.action() {
                run_action(check, &m, source, target, ctx)?;
            }
            if target.len() != before {
                return Err(ConversionError::invalid_rule(
                    key,
                    "existence-only rule wrote to the target store",
                ));
            }
            debug!("Validated {}", key);
            report.validated += 1;
        } else {
            match resolved.rule.action() {
                Some(action) => run_action(action, &m, source, target, ctx)?,
                None => replace_key(&m, source, target, ctx)?,
            }
            debug!("Converted {} -> {}", key, resolved.new_key);
            report.converted += 1;
        }
    }

    if !unmatched.is_empty() {
        if !drop_unmatched_keys {
            return Err(ConversionError::UnmatchedKey { keys: unmatched });
        }
        for key in &unmatched {
            warn!("Dropping key with no matching conversion rule: {}", key);
        }
        report.dropped = unmatched;
    }

    Ok(report)
}

fn run_action(
    action: &RuleAction,
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    ctx: &ActionContext<'_>,
) -> Result<()> {
    match action {
        RuleAction::Rename => replace_key(m, source, target, ctx),
        RuleAction::Constant(assertion) => assertion.apply(m, source, target, ctx),
        RuleAction::Custom(f) => f(m, source, target, ctx),
        RuleAction::Nested(_) => Err(ConversionError::invalid_rule(
            m.old_key,
            "nested rule set resolved as a terminal rule",
        )),
    }
}
