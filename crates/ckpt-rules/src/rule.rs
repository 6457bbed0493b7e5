//! A single conversion rule, compiled once per side

use crate::action::RuleAction;
use crate::segment::{Segment, group_name};
use ckpt_common::{ConversionError, Result, Side};
use regex::Regex;

/// Ordered segments plus what to do on a match.
///
/// The segments compile into one anchored regex per side. A rule whose
/// action is [`RuleAction::Nested`] matches a key prefix only and hands the
/// rest of the key to the child rule set; every other rule must match the
/// whole remaining key.
#[derive(Debug, Clone)]
pub struct ConversionRule {
    segments: Vec<Segment>,
    action: Option<RuleAction>,
    exists: Option<Side>,
    matchers: [Regex; 2],
}

impl ConversionRule {
    /// A rule that converts the keys it matches.
    pub fn new(segments: Vec<Segment>, action: RuleAction) -> Result<Self> {
        Self::compile(segments, Some(action), None)
    }

    /// An existence-only rule: the pattern lives on `side` alone, is claimed
    /// when `side` is the source, and never produces output.
    pub fn exists(segments: Vec<Segment>, side: Side) -> Result<Self> {
        Self::compile(segments, None, Some(side))
    }

    /// An existence-only rule that also runs a validation action.
    pub fn exists_with(segments: Vec<Segment>, side: Side, check: RuleAction) -> Result<Self> {
        Self::compile(segments, Some(check), Some(side))
    }

    fn compile(
        segments: Vec<Segment>,
        action: Option<RuleAction>,
        exists: Option<Side>,
    ) -> Result<Self> {
        let nested = matches!(action, Some(RuleAction::Nested(_)));
        if nested && exists.is_some() {
            return Err(ConversionError::invalid_rule(
                describe(&segments),
                "an existence-only rule cannot delegate to a nested rule set",
            ));
        }

        let build = |side: Side| -> Result<Regex> {
            let mut source = String::from("^");
            for (position, segment) in segments.iter().enumerate() {
                source.push_str(&segment.pattern(side, position));
            }
            if !nested {
                source.push('$');
            }
            Regex::new(&source).map_err(|e| ConversionError::invalid_rule(source.clone(), e.to_string()))
        };
        let matchers = [build(Side::Left)?, build(Side::Right)?];

        Ok(Self { segments, action, exists, matchers })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn action(&self) -> Option<&RuleAction> {
        self.action.as_ref()
    }

    /// The side an existence-only rule is restricted to.
    pub fn exists_on(&self) -> Option<Side> {
        self.exists
    }

    pub fn is_existence_check(&self) -> bool {
        self.exists.is_some()
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.action, Some(RuleAction::Nested(_)))
    }

    /// The compiled regex used when `side` is the source.
    pub fn pattern(&self, side: Side) -> &str {
        self.matchers[side.index()].as_str()
    }

    /// The full key this rule denotes on `side`, when every segment is literal.
    pub fn literal_key(&self, side: Side) -> Option<String> {
        if self.is_nested() {
            return None;
        }
        self.segments.iter().map(|s| s.literal(side)).collect()
    }

    /// Match `key[start..]` with `from` as the source side.
    ///
    /// Returns the rewritten key (with `prefix` prepended) and the offset
    /// in `key` where the match ended.
    pub(crate) fn match_at(
        &self,
        key: &str,
        start: usize,
        prefix: &str,
        from: Side,
    ) -> Option<(String, usize)> {
        if self.exists.is_some_and(|side| side != from) {
            return None;
        }
        let caps = self.matchers[from.index()].captures(&key[start..])?;

        let to = from.other();
        let mut new_key = String::from(prefix);
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Shared(_) => {
                    if let Some(m) = caps.name(&group_name(position)) {
                        new_key.push_str(m.as_str());
                    }
                }
                Segment::Divergent { left, right } => new_key.push_str(to.pick(left, right)),
            }
        }
        let end = caps.get(0).map_or(0, |m| m.end());
        Some((new_key, start + end))
    }
}

fn describe(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Shared(f) => f.clone(),
            Segment::Divergent { left, right } => format!("[{left}|{right}]"),
        })
        .collect()
}
