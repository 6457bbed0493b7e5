//! Values held by a [`NamedValueStore`](crate::NamedValueStore)

use candle_core::{DType, Tensor, WithDType};

/// A checkpoint parameter or a config field.
///
/// Tensors share storage on clone, so aliasing two keys to the same value
/// (weight tying) is just a clone.
#[derive(Debug, Clone)]
pub enum Value {
    Tensor(Tensor),
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    None,
    /// An empty nested mapping (`{}`) of a config document.
    EmptySection,
}

impl Value {
    /// Short name of the variant, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "tensor",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::None => "none",
            Self::EmptySection => "empty section",
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Self::Tensor(_))
    }
}

fn elements_equal<T: WithDType>(a: &Tensor, b: &Tensor, same: impl Fn(&T, &T) -> bool) -> bool {
    let flat = |t: &Tensor| t.flatten_all().and_then(|t| t.to_vec1::<T>());
    match (flat(a), flat(b)) {
        (Ok(x), Ok(y)) => x.len() == y.len() && x.iter().zip(&y).all(|(l, r)| same(l, r)),
        _ => false,
    }
}

fn tensors_equal(a: &Tensor, b: &Tensor) -> bool {
    if a.dims() != b.dims() || a.dtype() != b.dtype() {
        return false;
    }
    let bits = |l: &f64, r: &f64| l.to_bits() == r.to_bits();
    match a.dtype() {
        DType::U8 => elements_equal::<u8>(a, b, |l, r| l == r),
        DType::U32 => elements_equal::<u32>(a, b, |l, r| l == r),
        DType::I64 => elements_equal::<i64>(a, b, |l, r| l == r),
        DType::F64 => elements_equal::<f64>(a, b, bits),
        // Narrower floats widen to f64 exactly.
        _ => match (a.to_dtype(DType::F64), b.to_dtype(DType::F64)) {
            (Ok(x), Ok(y)) => elements_equal::<f64>(&x, &y, bits),
            _ => false,
        },
    }
}

/// Scalars compare by value (an int equals a float of the same value);
/// tensors compare by shape, dtype, and exact element bits.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Tensor(a), Self::Tensor(b)) => tensors_equal(a, b),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => *a as f64 == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::None, Self::None) => true,
            (Self::EmptySection, Self::EmptySection) => true,
            _ => false,
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Self::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::None)
    }
}
