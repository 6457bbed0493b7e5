//! Ordered rule trees and key resolution

use crate::action::RuleAction;
use crate::rule::ConversionRule;
use ckpt_common::{ConversionError, Result, Side};

/// An ordered list of rules; list order is match priority.
///
/// Rules with a [`RuleAction::Nested`] action own a child `RuleSet`, so a
/// converter's rules form a tree. Sharing a child between parents goes
/// through `Arc`, which keeps the tree acyclic.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ConversionRule>,
}

/// A terminal rule together with the key it rewrites the source key to.
#[derive(Debug, Clone)]
pub struct Resolved<'r> {
    pub rule: &'r ConversionRule,
    pub new_key: String,
}

impl RuleSet {
    /// Build a rule set, rejecting converting rules that share a compiled
    /// pattern on either side.
    pub fn new(rules: Vec<ConversionRule>) -> Result<Self> {
        let converting: Vec<&ConversionRule> =
            rules.iter().filter(|r| !r.is_existence_check()).collect();
        for (i, first) in converting.iter().enumerate() {
            for second in &converting[i + 1..] {
                for side in [Side::Left, Side::Right] {
                    if first.pattern(side) == second.pattern(side) {
                        return Err(ConversionError::AmbiguousRule {
                            key: format!("<{side} pattern>"),
                            first: first.pattern(side).to_string(),
                            second: second.pattern(side).to_string(),
                        });
                    }
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ConversionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First terminal rule claiming `key` when `from` is the source side.
    ///
    /// A nested rule whose child set matches nothing falls through to the
    /// next rule of the parent.
    pub fn resolve(&self, key: &str, from: Side) -> Option<Resolved<'_>> {
        self.resolve_from(key, 0, "", from)
    }

    fn resolve_from(&self, key: &str, start: usize, prefix: &str, from: Side) -> Option<Resolved<'_>> {
        for rule in &self.rules {
            let Some((new_key, end)) = rule.match_at(key, start, prefix, from) else {
                continue;
            };
            match rule.action() {
                Some(RuleAction::Nested(child)) => {
                    if let Some(found) = child.resolve_from(key, end, &new_key, from) {
                        return Some(found);
                    }
                }
                _ => return Some(Resolved { rule, new_key }),
            }
        }
        None
    }

    /// Check that no key is claimed by two different converting rules.
    ///
    /// Unlike [`resolve`](Self::resolve) this explores every path through the
    /// tree. A key that reaches the same rule along several prefix paths is
    /// not ambiguous; first-match order picks the path.
    pub fn audit<'k>(&self, keys: impl IntoIterator<Item = &'k str>, from: Side) -> Result<()> {
        for key in keys {
            let mut claims = Vec::new();
            self.collect_claims(key, 0, "", from, &mut claims);

            let mut distinct: Vec<&ConversionRule> = Vec::new();
            for rule in claims {
                if !distinct.iter().any(|seen| std::ptr::eq(*seen, rule)) {
                    distinct.push(rule);
                }
            }
            if let [first, second, ..] = distinct.as_slice() {
                return Err(ConversionError::AmbiguousRule {
                    key: key.to_string(),
                    first: first.pattern(from).to_string(),
                    second: second.pattern(from).to_string(),
                });
            }
        }
        Ok(())
    }

    fn collect_claims<'r>(
        &'r self,
        key: &str,
        start: usize,
        prefix: &str,
        from: Side,
        claims: &mut Vec<&'r ConversionRule>,
    ) {
        for rule in &self.rules {
            let Some((new_key, end)) = rule.match_at(key, start, prefix, from) else {
                continue;
            };
            match rule.action() {
                Some(RuleAction::Nested(child)) => child.collect_claims(key, end, &new_key, from, claims),
                _ if rule.is_existence_check() => {}
                _ => claims.push(rule),
            }
        }
    }
}
