//! Pattern segments: the atomic matching units of a conversion rule

use ckpt_common::Side;

/// One ordinal position of a rule's key pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Regex fragment identical on both sides; the matched text is carried
    /// into the target key verbatim.
    Shared(String),
    /// Same concept, different literal name per side. Either literal may be
    /// empty, which turns the segment into a prefix that one side lacks.
    Divergent { left: String, right: String },
}

/// Regex fragment shared by both schemas, e.g. `r"\.\d+\."`.
pub fn shared(fragment: impl Into<String>) -> Segment {
    Segment::Shared(fragment.into())
}

/// Literal that differs per schema, e.g. `divergent("ln_f", "transformer_decoder.norm")`.
pub fn divergent(left: impl Into<String>, right: impl Into<String>) -> Segment {
    Segment::Divergent { left: left.into(), right: right.into() }
}

pub(crate) fn group_name(position: usize) -> String {
    format!("s{position}")
}

impl Segment {
    /// Regex source contributed when `side` is the source of the match.
    pub(crate) fn pattern(&self, side: Side, position: usize) -> String {
        match self {
            Self::Shared(fragment) => format!("(?P<{}>{})", group_name(position), fragment),
            Self::Divergent { left, right } => {
                format!("(?:{})", regex::escape(side.pick(left, right)))
            }
        }
    }

    /// The literal text of this segment on `side`, if it has one.
    ///
    /// Shared fragments only count as literal when they contain no regex
    /// metacharacters.
    pub fn literal(&self, side: Side) -> Option<&str> {
        match self {
            Self::Shared(fragment) => {
                (regex::escape(fragment) == *fragment).then_some(fragment.as_str())
            }
            Self::Divergent { left, right } => Some(side.pick(left, right).as_str()),
        }
    }
}
