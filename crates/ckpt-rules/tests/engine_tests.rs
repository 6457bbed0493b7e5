//! Integration tests for `ckpt-rules`.
//!
//! Covers:
//! - Existence-only rules (claim without writing, validation actions)
//! - Unmatched-key strictness and dropping
//! - Nested rule sets and prefix composition
//! - Config conversion: sections, defaults, constant back-fill
//! - Source immutability outside `pre_convert`
//! - Concurrent conversions sharing one converter

use anyhow::Result;
use ckpt_common::{ConversionError, FormatVersions, NamedValueStore, Side, Value};
use ckpt_rules::{
    ActionContext, CheckpointConverter, ConfigConverter, ConversionRule, PrefixCompat, RuleAction,
    RuleSet, apply_defaults, apply_rules, assert_constant, convert_with_config, divergent, shared,
};

fn store(pairs: &[(&str, i64)]) -> NamedValueStore {
    pairs.iter().copied().collect()
}

fn ctx(from: Side) -> ActionContext<'static> {
    ActionContext::new(from, None)
}

// ── Existence-only rules ────────────────────────────────────────────────────

#[test]
fn existence_only_rules_never_write() -> Result<()> {
    let rules = RuleSet::new(vec![
        ConversionRule::exists(vec![shared(r"h\.\d+\.attn\.(?:masked_bias|bias)")], Side::Left)?,
        ConversionRule::exists(vec![shared(r"h\.\d+\.attn\.causal_mask")], Side::Left)?,
    ])?;
    let source = store(&[("h.0.attn.bias", 1), ("h.0.attn.masked_bias", 2), ("h.1.attn.causal_mask", 3)]);
    let mut target = NamedValueStore::new();

    let report = apply_rules(&rules, &source, &mut target, &ctx(Side::Left), false)?;
    assert!(target.is_empty());
    assert_eq!(report.validated, 3);
    assert_eq!(report.converted, 0);
    assert!(report.dropped.is_empty());
    Ok(())
}

#[test]
fn existence_rule_does_not_apply_from_the_other_side() -> Result<()> {
    let rules = RuleSet::new(vec![ConversionRule::exists(vec![shared(r"lm_head\.weight")], Side::Right)?])?;
    let source = store(&[("lm_head.weight", 1)]);
    let mut target = NamedValueStore::new();

    let err = apply_rules(&rules, &source, &mut target, &ctx(Side::Left), false).unwrap_err();
    assert!(matches!(err, ConversionError::UnmatchedKey { .. }));
    Ok(())
}

#[test]
fn existence_rule_runs_its_validation_action() -> Result<()> {
    let rules = RuleSet::new(vec![ConversionRule::exists_with(
        vec![shared("use_ffn_bias")],
        Side::Right,
        assert_constant(Side::Right, true),
    )?])?;
    let mut target = NamedValueStore::new();

    let good: NamedValueStore = [("use_ffn_bias", true)].into_iter().collect();
    apply_rules(&rules, &good, &mut target, &ctx(Side::Right), false)?;
    assert!(target.is_empty());

    let bad: NamedValueStore = [("use_ffn_bias", false)].into_iter().collect();
    let err = apply_rules(&rules, &bad, &mut target, &ctx(Side::Right), false).unwrap_err();
    assert!(err.is_config_error());
    Ok(())
}

#[test]
fn existence_rule_that_writes_is_a_rule_bug() -> Result<()> {
    let writer = RuleAction::custom(|m, _source, target, _ctx| {
        target.insert(m.new_key, 0i64);
        Ok(())
    });
    let rules = RuleSet::new(vec![ConversionRule::exists_with(vec![shared("x")], Side::Left, writer)?])?;
    let mut target = NamedValueStore::new();

    let err = apply_rules(&rules, &store(&[("x", 1)]), &mut target, &ctx(Side::Left), false).unwrap_err();
    assert!(matches!(err, ConversionError::InvalidRule { .. }));
    Ok(())
}

#[test]
fn existence_rule_cannot_be_nested() -> Result<()> {
    let err = ConversionRule::exists_with(
        vec![shared("x")],
        Side::Left,
        RuleAction::nested(RuleSet::default()),
    )
    .unwrap_err();
    assert!(matches!(err, ConversionError::InvalidRule { .. }));
    Ok(())
}

// ── Unmatched keys ──────────────────────────────────────────────────────────

fn embedding_rules() -> Result<RuleSet> {
    Ok(RuleSet::new(vec![ConversionRule::new(
        vec![divergent("wte", "embedding_layer.word_embeddings"), shared(r"\.(?:weight|bias)")],
        RuleAction::Rename,
    )?])?)
}

#[test]
fn unmatched_key_is_an_error_in_strict_mode() -> Result<()> {
    let rules = embedding_rules()?;
    let source = store(&[("wte.weight", 1), ("mystery.weight", 2), ("other", 3)]);
    let mut target = NamedValueStore::new();

    match apply_rules(&rules, &source, &mut target, &ctx(Side::Left), false) {
        Err(ConversionError::UnmatchedKey { keys }) => assert_eq!(keys, vec!["mystery.weight", "other"]),
        other => panic!("expected UnmatchedKey, got {other:?}"),
    }
    Ok(())
}

#[test]
fn unmatched_key_is_dropped_when_allowed() -> Result<()> {
    let rules = embedding_rules()?;
    let source = store(&[("wte.weight", 1), ("mystery.weight", 2)]);
    let mut target = NamedValueStore::new();

    let report = apply_rules(&rules, &source, &mut target, &ctx(Side::Left), true)?;
    assert_eq!(target.keys().collect::<Vec<_>>(), vec!["embedding_layer.word_embeddings.weight"]);
    assert_eq!(report.dropped, vec!["mystery.weight"]);
    Ok(())
}

// ── Checkpoint converters ───────────────────────────────────────────────────

const HF: FormatVersions = FormatVersions::new(&["hf"]);
const CS17: FormatVersions = FormatVersions::new(&["cs-1.7"]);
const CS18: FormatVersions = FormatVersions::new(&["cs-1.8", "cs-1.9"]);

/// Copies embeddings and, out of the left format, adds a `head.weight`.
struct ToyConverter {
    rules: RuleSet,
}

impl ToyConverter {
    fn new() -> Result<Self> {
        Ok(Self { rules: embedding_rules()? })
    }
}

impl CheckpointConverter for ToyConverter {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        (HF, CS17)
    }

    fn converter_note(&self) -> String {
        format!("{HF} toy <-> {CS17} toy")
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn config_converter(&self) -> Option<Box<dyn ConfigConverter>> {
        ToyConfig::new().ok().map(|c| Box::new(c) as Box<dyn ConfigConverter>)
    }

    fn pre_convert(&self, source: &mut NamedValueStore, ctx: &ActionContext<'_>) -> ckpt_common::Result<()> {
        if ctx.from() == Side::Right && !source.contains_key("embedding_layer.word_embeddings.weight") {
            source.insert("embedding_layer.word_embeddings.weight", 7i64);
        }
        Ok(())
    }

    fn post_convert(
        &self,
        _source: &NamedValueStore,
        target: &mut NamedValueStore,
        ctx: &ActionContext<'_>,
    ) -> ckpt_common::Result<()> {
        if ctx.from() == Side::Left {
            let configs = ctx.configs()?;
            let width = configs.right().get_i64("model.hidden_size")?;
            target.insert("head.weight", width);
            if let Some(vocab) = configs.left().get("vocab_size") {
                target.insert("head.rows", vocab.clone());
            }
        }
        Ok(())
    }
}

struct ToyConfig {
    rules: RuleSet,
}

impl ToyConfig {
    fn new() -> ckpt_common::Result<Self> {
        Ok(Self {
            rules: RuleSet::new(vec![
                ConversionRule::new(vec![divergent("n_embd", "hidden_size")], RuleAction::Rename)?,
                ConversionRule::new(vec![shared("vocab_size")], RuleAction::Rename)?,
                ConversionRule::new(vec![shared("scale_attn_weights")], assert_constant(Side::Left, true))?,
                ConversionRule::new(
                    vec![shared("position_embedding_type")],
                    assert_constant(Side::Right, "rotary"),
                )?,
            ])?,
        })
    }
}

impl ConfigConverter for ToyConfig {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        (HF, CS17)
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn section(&self, side: Side) -> Option<&'static str> {
        side.pick(None, Some("model"))
    }

    fn pre_convert(&self, config: &mut NamedValueStore, from: Side) -> ckpt_common::Result<()> {
        match from {
            Side::Left => {
                apply_defaults(config, [("vocab_size", Value::Int(50400))]);
                if config.get_i64("n_embd")? <= 0 {
                    return Err(ConversionError::config("n_embd must be positive"));
                }
            }
            Side::Right => apply_defaults(config, [("position_embedding_type", Value::from("rotary"))]),
        }
        Ok(())
    }
}

#[test]
fn pre_convert_is_the_only_source_mutation() -> Result<()> {
    let converter = ToyConverter::new()?;
    let mut source = store(&[("wte.weight", 1)]);
    let configs = ckpt_rules::ConfigPair::new(NamedValueStore::new(), store(&[("model.hidden_size", 64)]));

    let target = converter.convert(&mut source, Side::Left, Some(&configs), false)?;
    assert_eq!(source.keys().collect::<Vec<_>>(), vec!["wte.weight"]);
    assert_eq!(target.get("head.weight"), Some(&Value::Int(64)));

    let mut cs = NamedValueStore::new();
    let back = converter.convert(&mut cs, Side::Right, None, false)?;
    assert!(cs.contains_key("embedding_layer.word_embeddings.weight"));
    assert_eq!(back.get("wte.weight"), Some(&Value::Int(7)));
    Ok(())
}

#[test]
fn post_convert_without_configs_reports_missing_configs() -> Result<()> {
    let converter = ToyConverter::new()?;
    let err = converter.convert(&mut store(&[("wte.weight", 1)]), Side::Left, None, false).unwrap_err();
    assert!(matches!(err, ConversionError::MissingRequiredKey { .. }));
    Ok(())
}

#[test]
fn config_sections_defaults_and_backfill() -> Result<()> {
    let config = ToyConfig::new()?;
    let hf = store(&[("n_embd", 128)]);

    let cs = config.convert(&hf, Side::Left, false)?;
    assert_eq!(cs.get_i64("model.hidden_size")?, 128);
    assert_eq!(cs.get_i64("model.vocab_size")?, 50400);
    assert_eq!(cs.get_str("model.position_embedding_type")?, "rotary");
    assert!(!cs.contains_key("model.scale_attn_weights"));

    let back = config.convert(&cs, Side::Right, false)?;
    assert_eq!(back.get_i64("n_embd")?, 128);
    assert!(back.get_bool("scale_attn_weights")?);
    assert!(!back.contains_key("position_embedding_type"));
    Ok(())
}

#[test]
fn config_constant_mismatch_is_rejected() -> Result<()> {
    let config = ToyConfig::new()?;
    let cs: NamedValueStore =
        [("model.hidden_size", Value::Int(8)), ("model.position_embedding_type", Value::from("learned"))]
            .into_iter()
            .collect();
    assert!(config.convert(&cs, Side::Right, false).unwrap_err().is_config_error());
    Ok(())
}

#[test]
fn pipeline_converts_config_before_checkpoint() -> Result<()> {
    let converter = ToyConverter::new()?;
    let mut checkpoint = store(&[("wte.weight", 1)]);

    let converted = convert_with_config(&converter, &mut checkpoint, &store(&[("n_embd", 32)]), Side::Left, false)?;
    assert_eq!(converted.config.get_i64("model.hidden_size")?, 32);
    assert_eq!(converted.checkpoint.get("head.weight"), Some(&Value::Int(32)));
    assert_eq!(converted.checkpoint.get("head.rows"), Some(&Value::Int(50400)));

    let err = convert_with_config(&converter, &mut checkpoint, &store(&[("n_embd", 0)]), Side::Left, false)
        .unwrap_err();
    assert!(err.is_config_error());
    Ok(())
}

#[test]
fn defaulted_source_record_keeps_its_section_and_other_fields() -> Result<()> {
    let config = ToyConfig::new()?;
    let cs: NamedValueStore =
        [("model.hidden_size", Value::Int(8)), ("train_input.batch_size", Value::Int(4))].into_iter().collect();

    let (source, target) = config.convert_with_source(&cs, Side::Right, false)?;
    assert_eq!(source.get_str("model.position_embedding_type")?, "rotary");
    assert_eq!(source.get_i64("model.hidden_size")?, 8);
    assert_eq!(source.get_i64("train_input.batch_size")?, 4);
    assert_eq!(target.get_i64("n_embd")?, 8);
    assert!(!target.contains_key("batch_size"));

    let (hf, _) = config.convert_with_source(&store(&[("n_embd", 16)]), Side::Left, false)?;
    assert_eq!(hf.get_i64("vocab_size")?, 50400);
    assert_eq!(hf.get_i64("n_embd")?, 16);
    Ok(())
}

// ── Version composition ─────────────────────────────────────────────────────

#[test]
fn prefix_compat_accepts_both_layouts() -> Result<()> {
    let converter = PrefixCompat::new(ToyConverter::new()?, (HF, CS18), "", "model.")?;
    let configs = ckpt_rules::ConfigPair::new(NamedValueStore::new(), store(&[("model.hidden_size", 8)]));

    let mut plain = store(&[("embedding_layer.word_embeddings.weight", 1)]);
    let a = converter.convert(&mut plain, Side::Right, Some(&configs), false)?;
    let mut wrapped = store(&[("model.embedding_layer.word_embeddings.weight", 1)]);
    let b = converter.convert(&mut wrapped, Side::Right, Some(&configs), false)?;
    assert!(a.contains_key("wte.weight"));
    assert!(b.contains_key("wte.weight"));

    let mut hf = store(&[("wte.weight", 1)]);
    let cs = converter.convert(&mut hf, Side::Left, Some(&configs), false)?;
    assert!(cs.contains_key("embedding_layer.word_embeddings.weight"));

    converter.rules().audit(["wte.weight"], Side::Left)?;
    assert_eq!(converter.config_converter().map(|c| c.formats()), Some((HF, CS18)));
    assert_eq!(converter.converter_note(), "hf toy <-> cs-1.7 toy");
    Ok(())
}

// ── Concurrency ─────────────────────────────────────────────────────────────

#[test]
fn one_converter_serves_many_threads() -> Result<()> {
    let converter = ToyConverter::new()?;
    let configs = ckpt_rules::ConfigPair::new(NamedValueStore::new(), store(&[("model.hidden_size", 16)]));

    let results: Vec<ckpt_common::Result<NamedValueStore>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8i64)
            .map(|i| {
                let converter = &converter;
                let configs = &configs;
                s.spawn(move || {
                    let mut source = store(&[("wte.weight", i)]);
                    converter.convert(&mut source, Side::Left, Some(configs), false)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("conversion thread panicked")).collect()
    });

    for (i, result) in results.into_iter().enumerate() {
        let target = result?;
        assert_eq!(target.get("embedding_layer.word_embeddings.weight"), Some(&Value::Int(i as i64)));
    }
    Ok(())
}
