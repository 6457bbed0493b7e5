//! Rule actions and the context they run in

use ckpt_common::{ConversionError, NamedValueStore, Result, Side, Value};
use std::fmt;
use std::sync::Arc;

/// The pair of keys a rule matched: the source key and its rewrite.
#[derive(Debug, Clone, Copy)]
pub struct KeyMatch<'a> {
    pub old_key: &'a str,
    pub new_key: &'a str,
}

/// One config record per declared format, `(left, right)`, in each
/// record's native layout (sections included).
#[derive(Debug, Clone, Default)]
pub struct ConfigPair {
    left: NamedValueStore,
    right: NamedValueStore,
}

impl ConfigPair {
    pub fn new(left: NamedValueStore, right: NamedValueStore) -> Self {
        Self { left, right }
    }

    /// Order a `(source, target)` pair of records by side.
    pub fn from_source(from: Side, source: NamedValueStore, target: NamedValueStore) -> Self {
        match from {
            Side::Left => Self::new(source, target),
            Side::Right => Self::new(target, source),
        }
    }

    pub fn get(&self, side: Side) -> &NamedValueStore {
        side.pick(&self.left, &self.right)
    }

    pub fn left(&self) -> &NamedValueStore {
        &self.left
    }

    pub fn right(&self) -> &NamedValueStore {
        &self.right
    }
}

/// Everything an action may consult besides the two stores.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    from: Side,
    configs: Option<&'a ConfigPair>,
}

impl<'a> ActionContext<'a> {
    pub fn new(from: Side, configs: Option<&'a ConfigPair>) -> Self {
        Self { from, configs }
    }

    /// The source side of the running conversion.
    pub fn from(&self) -> Side {
        self.from
    }

    /// The target side of the running conversion.
    pub fn to(&self) -> Side {
        self.from.other()
    }

    /// Config records of the running checkpoint conversion.
    ///
    /// Config conversions run without them; actions that need
    /// cross-referenced settings fail here.
    pub fn configs(&self) -> Result<&'a ConfigPair> {
        self.configs.ok_or_else(|| {
            ConversionError::missing("<configs>", "this action needs the config records of both formats")
        })
    }
}

/// Signature of a custom value transformation.
pub type ActionFn = Arc<
    dyn Fn(&KeyMatch<'_>, &NamedValueStore, &mut NamedValueStore, &ActionContext<'_>) -> Result<()>
        + Send
        + Sync,
>;

/// A fixed architectural assumption held by one schema.
///
/// When the holding side is the source, the source value must equal
/// `value`. When it is the target, `value` is written without reading the
/// source.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantAssertion {
    pub side: Side,
    pub value: Value,
}

impl ConstantAssertion {
    pub fn apply(
        &self,
        m: &KeyMatch<'_>,
        source: &NamedValueStore,
        target: &mut NamedValueStore,
        ctx: &ActionContext<'_>,
    ) -> Result<()> {
        if ctx.from() == self.side {
            let actual = source.require(m.old_key)?;
            if *actual != self.value {
                return Err(ConversionError::config(format!(
                    "'{}' must be {:?} to convert out of the {} format, got {:?}",
                    m.old_key,
                    self.value,
                    self.side,
                    actual
                )));
            }
        } else {
            target.insert(m.new_key, self.value.clone());
        }
        Ok(())
    }
}

/// What a rule does once it has matched.
#[derive(Clone)]
pub enum RuleAction {
    /// Copy the value under the rewritten key.
    Rename,
    /// Assert or force a schema constant.
    Constant(ConstantAssertion),
    /// Arbitrary transformation (repacking, buffer synthesis, guards).
    Custom(ActionFn),
    /// Keep matching the residual key against a child rule set.
    Nested(Arc<crate::RuleSet>),
}

impl RuleAction {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&KeyMatch<'_>, &NamedValueStore, &mut NamedValueStore, &ActionContext<'_>) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn nested(rules: impl Into<Arc<crate::RuleSet>>) -> Self {
        Self::Nested(rules.into())
    }
}

/// Constant-assertion action for a field `side` fixes to `value`.
pub fn assert_constant(side: Side, value: impl Into<Value>) -> RuleAction {
    RuleAction::Constant(ConstantAssertion { side, value: value.into() })
}

impl fmt::Debug for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rename => f.write_str("Rename"),
            Self::Constant(c) => f.debug_tuple("Constant").field(c).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Nested(rules) => write!(f, "Nested({} rules)", rules.len()),
        }
    }
}

/// Copy the source value under the rewritten key.
pub fn replace_key(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    _ctx: &ActionContext<'_>,
) -> Result<()> {
    let value = source.require(m.old_key)?.clone();
    target.insert(m.new_key, value);
    Ok(())
}
