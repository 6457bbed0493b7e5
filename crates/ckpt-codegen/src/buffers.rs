//! Registered attention buffers the HF CodeGen modules carry
//!
//! The CS model computes these on the fly, so they are synthesized when
//! converting into the HF format.

use candle_core::{DType, Device, Tensor};
use ckpt_common::{ConversionError, Result};

/// Fill value HF uses for masked attention scores.
pub const MASKED_BIAS: f32 = -1e9;

/// Default base of the rotary embedding frequencies.
pub const DEFAULT_ROTARY_BASE: f64 = 10_000.0;

/// Lower-triangular `u8` causal mask of shape `(1, 1, P, P)`.
pub fn causal_mask(max_positions: usize) -> Result<Tensor> {
    Ok(Tensor::tril2(max_positions, DType::U8, &Device::Cpu)?.reshape((
        1,
        1,
        max_positions,
        max_positions,
    ))?)
}

/// Scalar masked-bias fill.
pub fn masked_bias() -> Result<Tensor> {
    Ok(Tensor::new(MASKED_BIAS, &Device::Cpu)?)
}

/// Rotary inverse frequencies `1 / base^(2i / rotary_dim)` for
/// `i in 0..rotary_dim / 2`.
///
/// Exponent, power and reciprocal are all evaluated in `f32`, matching the
/// buffer HF registers.
pub fn rotary_inv_freq(rotary_dim: usize, base: f64) -> Result<Tensor> {
    if rotary_dim == 0 {
        return Err(ConversionError::config("rotary_dim must be positive"));
    }
    let base = base as f32;
    let dim = rotary_dim as f32;
    let freqs: Vec<f32> = (0..rotary_dim)
        .step_by(2)
        .map(|i| 1.0f32 / base.powf(i as f32 / dim))
        .collect();
    let len = freqs.len();
    Ok(Tensor::from_vec(freqs, len, &Device::Cpu)?)
}
