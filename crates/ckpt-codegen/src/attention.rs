//! CodeGen attention block: packed HF projections <-> separate CS projections

use crate::buffers::{DEFAULT_ROTARY_BASE, causal_mask, masked_bias, rotary_inv_freq};
use crate::qkv::{DEFAULT_SHARD_COUNT, Projections, pack_qkv, unpack_qkv};
use crate::{CS17, HF};
use ckpt_common::{ConversionError, FormatVersions, NamedValueStore, Result, Side};
use ckpt_rules::{
    ActionContext, CheckpointConverter, ConversionRule, KeyMatch, RuleAction, RuleSet, divergent, shared,
};
use std::sync::Arc;
use tracing::debug;

const QUERY: &str = "proj_q_dense_layer";
const KEY: &str = "proj_k_dense_layer";
const VALUE: &str = "proj_v_dense_layer";
const PARAM: &str = r"\.(?:weight|bias)";

/// Converts the keys of one attention block (`qkv_proj.weight`, ...).
///
/// Used on its own for attention-only stores and nested under
/// `h.N.attn.` by the model converters.
pub struct AttentionConverter {
    shard_count: usize,
    rules: RuleSet,
}

impl AttentionConverter {
    pub fn new() -> Result<Self> {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }

    pub fn with_shard_count(shard_count: usize) -> Result<Self> {
        let rules = RuleSet::new(vec![
            ConversionRule::new(
                vec![divergent("qkv_proj", QUERY), shared(PARAM)],
                RuleAction::custom(move |m, source, target, ctx| {
                    convert_qkv(m, source, target, ctx, shard_count)
                }),
            )?,
            ConversionRule::exists_with(
                vec![divergent("qkv_proj", KEY), shared(PARAM)],
                Side::Right,
                RuleAction::custom(|m, source, target, ctx| {
                    assert_already_converted(m, source, target, ctx, KEY)
                }),
            )?,
            ConversionRule::exists_with(
                vec![divergent("qkv_proj", VALUE), shared(PARAM)],
                Side::Right,
                RuleAction::custom(|m, source, target, ctx| {
                    assert_already_converted(m, source, target, ctx, VALUE)
                }),
            )?,
            ConversionRule::new(
                vec![divergent("out_proj", "proj_output_dense_layer"), shared(PARAM)],
                RuleAction::Custom(Arc::new(convert_out_proj)),
            )?,
        ])?;
        Ok(Self { shard_count, rules })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}

impl CheckpointConverter for AttentionConverter {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        (HF, CS17)
    }

    fn converter_note(&self) -> String {
        format!("{HF} CodeGenAttention <-> {CS17} GPTJ attention (configured as codegen)")
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

/// Replace the dot-delimited segment `from` of `key` with `to`.
fn sibling(key: &str, from: &str, to: &str) -> Result<String> {
    if !key.split('.').any(|part| part == from) {
        return Err(ConversionError::invalid_rule(key, format!("expected a '{from}' segment")));
    }
    Ok(key
        .split('.')
        .map(|part| if part == from { to } else { part })
        .collect::<Vec<_>>()
        .join("."))
}

fn convert_qkv(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    ctx: &ActionContext<'_>,
    shard_count: usize,
) -> Result<()> {
    match ctx.from() {
        Side::Left => split_qkv(m, source, target, shard_count),
        Side::Right => merge_qkv(m, source, target, ctx, shard_count),
    }
}

fn split_qkv(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    shard_count: usize,
) -> Result<()> {
    if m.new_key.ends_with(".bias") {
        return Err(ConversionError::unsupported(
            m.old_key,
            "CodeGen does not support bias on the packed attention projection",
        ));
    }
    let Projections { query, key, value } = unpack_qkv(m.old_key, source.tensor(m.old_key)?, shard_count)?;

    let key_name = sibling(m.new_key, QUERY, KEY)?;
    let value_name = sibling(m.new_key, QUERY, VALUE)?;
    target.insert(m.new_key, query);
    target.insert(key_name, key);
    target.insert(value_name, value);
    Ok(())
}

fn merge_qkv(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    ctx: &ActionContext<'_>,
    shard_count: usize,
) -> Result<()> {
    let projections = Projections {
        query: source.tensor(m.old_key)?.clone(),
        key: source.tensor(&sibling(m.old_key, QUERY, KEY)?)?.clone(),
        value: source.tensor(&sibling(m.old_key, QUERY, VALUE)?)?.clone(),
    };
    target.insert(m.new_key, pack_qkv(m.old_key, &projections, shard_count)?);

    if let Some(attn) = m.new_key.strip_suffix("qkv_proj.bias") {
        let configs = ctx.configs()?;
        let max_positions = configs.right().get_usize("model.max_position_embeddings")?;
        let rotary_dim = configs.right().get_usize("model.rotary_dim")?;
        let base = configs.left().get_f64_or("rotary_emb_base", DEFAULT_ROTARY_BASE)?;

        target.insert(format!("{attn}bias"), causal_mask(max_positions)?);
        target.insert(format!("{attn}masked_bias"), masked_bias()?);
        target.insert(format!("{attn}rotary_emb.inv_freq"), rotary_inv_freq(rotary_dim, base)?);
        debug!("Synthesized causal mask, masked bias and rotary frequencies under {}", attn);
    }
    Ok(())
}

/// Packed-side guard for the key and value projections, which the query
/// action already folded into the packed tensor.
fn assert_already_converted(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &NamedValueStore,
    ctx: &ActionContext<'_>,
    projection: &str,
) -> Result<()> {
    if ctx.from() == Side::Left {
        return Err(ConversionError::invalid_rule(
            m.old_key,
            "key/value guard reached while the packed format is the source",
        ));
    }
    if target.contains_key(m.new_key) || source.contains_key(&sibling(m.old_key, projection, QUERY)?) {
        return Ok(());
    }
    Err(ConversionError::missing(
        m.old_key,
        format!("'{}' should have been packed with the query projection", m.new_key),
    ))
}

fn convert_out_proj(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    ctx: &ActionContext<'_>,
) -> Result<()> {
    target.insert(m.new_key, source.require(m.old_key)?.clone());

    if ctx.from() == Side::Right
        && let Some(attn) = m.new_key.strip_suffix("out_proj.weight")
    {
        let max_positions = ctx.configs()?.right().get_usize("model.max_position_embeddings")?;
        target.insert(format!("{attn}causal_mask"), causal_mask(max_positions)?);
        debug!("Synthesized {}causal_mask", attn);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use ckpt_rules::ConfigPair;

    fn configs() -> ConfigPair {
        ConfigPair::new(
            NamedValueStore::new(),
            [("model.max_position_embeddings", 8i64), ("model.rotary_dim", 4)].into_iter().collect(),
        )
    }

    fn weight(rows: usize, cols: usize) -> Tensor {
        Tensor::arange(0f32, (rows * cols) as f32, &Device::Cpu).unwrap().reshape((rows, cols)).unwrap()
    }

    #[test]
    fn test_sibling_replaces_whole_segment() {
        assert_eq!(
            sibling("layers.0.self_attn.proj_q_dense_layer.weight", QUERY, KEY).unwrap(),
            "layers.0.self_attn.proj_k_dense_layer.weight"
        );
        assert!(sibling("x.my_proj_q_dense_layer.weight", QUERY, KEY).is_err());
    }

    #[test]
    fn test_hf_packed_weight_splits_into_three() {
        let converter = AttentionConverter::new().unwrap();
        let mut source: NamedValueStore =
            [("qkv_proj.weight", weight(24, 8)), ("out_proj.weight", weight(8, 8))].into_iter().collect();
        let target = converter.convert(&mut source, Side::Left, None, false).unwrap();

        let keys: Vec<_> = target.keys().collect();
        assert_eq!(
            keys,
            vec![
                "proj_q_dense_layer.weight",
                "proj_k_dense_layer.weight",
                "proj_v_dense_layer.weight",
                "proj_output_dense_layer.weight"
            ]
        );
        assert_eq!(target.tensor("proj_k_dense_layer.weight").unwrap().dims(), &[8, 8]);
    }

    #[test]
    fn test_packed_bias_is_unsupported() {
        let converter = AttentionConverter::new().unwrap();
        let mut source: NamedValueStore = [("qkv_proj.bias", Tensor::zeros(24, DType::F32, &Device::Cpu).unwrap())]
            .into_iter()
            .collect();
        let err = converter.convert(&mut source, Side::Left, None, false).unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedLayout { .. }));
    }

    #[test]
    fn test_cs_projections_pack_and_mask_is_synthesized() {
        let converter = AttentionConverter::new().unwrap();
        let mut source: NamedValueStore = [
            ("proj_q_dense_layer.weight", weight(8, 8)),
            ("proj_k_dense_layer.weight", weight(8, 8)),
            ("proj_v_dense_layer.weight", weight(8, 8)),
            ("proj_output_dense_layer.weight", weight(8, 8)),
        ]
        .into_iter()
        .collect();
        let configs = configs();
        let target = converter.convert(&mut source, Side::Right, Some(&configs), false).unwrap();

        assert_eq!(target.tensor("qkv_proj.weight").unwrap().dims(), &[24, 8]);
        assert_eq!(target.tensor("causal_mask").unwrap().dims(), &[1, 1, 8, 8]);
        assert!(target.contains_key("out_proj.weight"));
        assert_eq!(target.len(), 3);
    }

    #[test]
    fn test_cs_bias_packs_and_synthesizes_buffers() {
        let converter = AttentionConverter::new().unwrap();
        let bias = || Tensor::ones(8, DType::F32, &Device::Cpu).unwrap();
        let mut source: NamedValueStore = [
            ("proj_q_dense_layer.bias", bias()),
            ("proj_k_dense_layer.bias", bias()),
            ("proj_v_dense_layer.bias", bias()),
        ]
        .into_iter()
        .collect();
        let configs = configs();
        let target = converter.convert(&mut source, Side::Right, Some(&configs), false).unwrap();

        assert_eq!(target.tensor("qkv_proj.bias").unwrap().dims(), &[24]);
        assert_eq!(target.tensor("bias").unwrap().dims(), &[1, 1, 8, 8]);
        assert_eq!(target.tensor("masked_bias").unwrap().rank(), 0);
        assert_eq!(target.tensor("rotary_emb.inv_freq").unwrap().dims(), &[2]);
    }

    #[test]
    fn test_missing_key_projection_is_reported() {
        let converter = AttentionConverter::new().unwrap();
        let mut source: NamedValueStore =
            [("proj_q_dense_layer.weight", weight(8, 8)), ("proj_v_dense_layer.weight", weight(8, 8))]
                .into_iter()
                .collect();
        let err = converter.convert(&mut source, Side::Right, None, false).unwrap_err();
        assert!(matches!(err, ConversionError::MissingRequiredKey { key, .. } if key == "proj_k_dense_layer.weight"));
    }

    #[test]
    fn test_orphan_key_projection_fails_the_guard() {
        let converter = AttentionConverter::new().unwrap();
        let mut source: NamedValueStore = [("proj_k_dense_layer.weight", weight(8, 8))].into_iter().collect();
        let err = converter.convert(&mut source, Side::Right, None, false).unwrap_err();
        assert!(matches!(err, ConversionError::MissingRequiredKey { .. }));
    }

    #[test]
    fn test_guard_from_packed_side_is_a_rule_bug() {
        let m = KeyMatch { old_key: "qkv_proj.weight", new_key: "proj_k_dense_layer.weight" };
        let ctx = ActionContext::new(Side::Left, None);
        let err = assert_already_converted(&m, &NamedValueStore::new(), &NamedValueStore::new(), &ctx, KEY)
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidRule { .. }));
    }
}
