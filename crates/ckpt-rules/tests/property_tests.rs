//! Property-based tests for rule matching.
//!
//! Key rewriting must be invertible: a key rewritten out of one format and
//! resolved again from the other format comes back unchanged.

use ckpt_common::Side;
use ckpt_rules::{ConversionRule, RuleAction, RuleSet, divergent, shared};
use proptest::prelude::*;

fn block_rules() -> RuleSet {
    let weight = |left: &str, right: &str| {
        ConversionRule::new(vec![divergent(left, right), shared(r"\.(?:weight|bias)")], RuleAction::Rename)
            .expect("static rule compiles")
    };
    let block = RuleSet::new(vec![
        weight("ln_1", "norm1"),
        weight("mlp.fc_in", "ffn.ffn.0.linear_layer"),
        weight("mlp.fc_out", "ffn.ffn.1.linear_layer"),
    ])
    .expect("static rule set");

    RuleSet::new(vec![
        weight("wte", "embedding_layer.word_embeddings"),
        weight("ln_f", "transformer_decoder.norm"),
        ConversionRule::new(
            vec![divergent("h", "transformer_decoder.layers"), shared(r"\.\d+\.")],
            RuleAction::nested(block),
        )
        .expect("static rule compiles"),
    ])
    .expect("static rule set")
}

// ── Strategies ──────────────────────────────────────────────────────────────

fn arb_hf_key() -> impl Strategy<Value = String> {
    let param = prop_oneof![Just("weight"), Just("bias")];
    let module = prop_oneof![Just("ln_1"), Just("mlp.fc_in"), Just("mlp.fc_out")];
    prop_oneof![
        param.clone().prop_map(|p| format!("wte.{p}")),
        param.clone().prop_map(|p| format!("ln_f.{p}")),
        (0usize..64, module, param).prop_map(|(i, m, p)| format!("h.{i}.{m}.{p}")),
    ]
}

// ── Properties ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn rewritten_keys_resolve_back(key in arb_hf_key()) {
        let rules = block_rules();
        let forward = rules.resolve(&key, Side::Left).expect("every generated key has a rule");
        let back = rules.resolve(&forward.new_key, Side::Right).expect("rewritten key has a rule");
        prop_assert_eq!(back.new_key, key);
    }

    #[test]
    fn layer_index_is_carried_verbatim(i in 0usize..10_000) {
        let rules = block_rules();
        let resolved = rules.resolve(&format!("h.{i}.ln_1.weight"), Side::Left).expect("block key");
        prop_assert_eq!(resolved.new_key, format!("transformer_decoder.layers.{i}.norm1.weight"));
    }

    #[test]
    fn generated_keys_are_unambiguous(key in arb_hf_key()) {
        let rules = block_rules();
        prop_assert!(rules.audit([key.as_str()], Side::Left).is_ok());
    }

    #[test]
    fn trailing_garbage_never_matches(key in arb_hf_key(), tail in "[a-z_]{1,8}") {
        let rules = block_rules();
        let garbage = format!("{key}.{tail}");
        prop_assert!(rules.resolve(&garbage, Side::Left).is_none());
    }
}
