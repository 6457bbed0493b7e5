//! Packed query/key/value projection layout
//!
//! The packed layout stores the three projections as one `(3h, h)` tensor
//! split into `shard_count` contiguous groups along the first axis. Each
//! group holds an `h / shard_count` row block of query, then value, then
//! key. Value sits in the middle.

use candle_core::{Tensor, D};
use ckpt_common::{ConversionError, Result};

/// Shard count of the packed CodeGen attention layout.
pub const DEFAULT_SHARD_COUNT: usize = 4;

/// The three projections of one attention block.
#[derive(Debug, Clone)]
pub struct Projections {
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
}

/// Split a packed `(3h, h)` weight into `(h, h)` query, key and value.
///
/// `key` names the tensor in error messages.
pub fn unpack_qkv(key: &str, packed: &Tensor, shard_count: usize) -> Result<Projections> {
    let (packed_dim, hidden) = packed.dims2().map_err(|_| shape_error(key, packed, "expected a 2-D packed weight"))?;
    if packed_dim != 3 * hidden {
        return Err(shape_error(
            key,
            packed,
            "first dimension must be 3x the second since query, key and value are packed",
        ));
    }
    if shard_count == 0 || hidden % shard_count != 0 {
        return Err(shape_error(
            key,
            packed,
            &format!("hidden size must be divisible by the shard count {shard_count}"),
        ));
    }

    let local = hidden / shard_count;
    let sharded = packed.reshape((shard_count, 3 * local, hidden))?;
    let block = |index: usize| -> Result<Tensor> {
        Ok(sharded.narrow(1, index * local, local)?.reshape((hidden, hidden))?)
    };

    Ok(Projections { query: block(0)?, value: block(1)?, key: block(2)? })
}

/// Pack separate projections into the sharded layout.
///
/// Accepts `(rows, cols)` weights or `(len,)` biases; all three must share
/// one shape and the leading dimension must divide by `shard_count`.
pub fn pack_qkv(key: &str, projections: &Projections, shard_count: usize) -> Result<Tensor> {
    let Projections { query, key: k, value } = projections;
    let dims = query.dims();
    for other in [k, value] {
        if other.dims() != dims {
            return Err(shape_error(
                key,
                other,
                &format!("query, key and value must share one shape, query is {dims:?}"),
            ));
        }
    }
    let rows = dims.first().copied().unwrap_or(0);
    if shard_count == 0 || rows % shard_count != 0 {
        return Err(shape_error(
            key,
            query,
            &format!("leading dimension must be divisible by the shard count {shard_count}"),
        ));
    }

    let packed = match *dims {
        [rows, cols] => {
            let shard = |t: &Tensor| t.reshape((shard_count, rows / shard_count, cols));
            Tensor::cat(&[shard(query)?, shard(value)?, shard(k)?], 1)?.reshape((3 * rows, cols))?
        }
        [len] => {
            let shard = |t: &Tensor| t.reshape((shard_count, len / shard_count));
            Tensor::cat(&[shard(query)?, shard(value)?, shard(k)?], D::Minus1)?.reshape(3 * len)?
        }
        _ => {
            return Err(ConversionError::unsupported(
                key,
                format!("cannot pack {}-D projections", dims.len()),
            ));
        }
    };
    Ok(packed)
}

fn shape_error(key: &str, tensor: &Tensor, expected: &str) -> ConversionError {
    ConversionError::ShapeMismatch {
        key: key.to_string(),
        actual: tensor.dims().to_vec(),
        expected: expected.to_string(),
    }
}
