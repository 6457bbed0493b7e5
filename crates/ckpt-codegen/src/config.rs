//! CodeGen HF `config.json` <-> CS `params.yaml` model section

use crate::{CS17, HF};
use ckpt_common::{ConversionError, FormatVersions, NamedValueStore, Result, Side, Value};
use ckpt_rules::{ConfigConverter, ConversionRule, RuleAction, RuleSet, apply_defaults, assert_constant, divergent, shared};

/// Smallest head count the packed attention layout supports.
pub const MIN_HEADS: i64 = 4;

/// Section of the CS params file holding the model fields.
pub const CS_MODEL_SECTION: &str = "model";

pub struct CodegenConfigConverter {
    rules: RuleSet,
}

impl CodegenConfigConverter {
    pub fn new() -> Result<Self> {
        let rename = |name: &str| ConversionRule::new(vec![shared(name)], RuleAction::Rename);
        let renamed = |hf: &str, cs: &str| ConversionRule::new(vec![divergent(hf, cs)], RuleAction::Rename);
        let fixed = |name: &str, side: Side, value: Value| {
            ConversionRule::new(vec![shared(name)], assert_constant(side, value))
        };
        let cs_only = |name: &str, value: Value| {
            ConversionRule::exists_with(vec![shared(name)], Side::Right, assert_constant(Side::Right, value))
        };

        let rules = RuleSet::new(vec![
            // embedding
            rename("vocab_size")?,
            rename("rotary_dim")?,
            fixed("position_embedding_type", Side::Right, Value::from("rotary"))?,
            cs_only("use_position_embedding", Value::Bool(true))?,
            renamed("embd_pdrop", "embedding_dropout_rate")?,
            renamed("tie_word_embeddings", "share_embedding_weights")?,
            // decoder block
            renamed("n_embd", "hidden_size")?,
            renamed("n_head", "num_heads")?,
            renamed("n_layer", "num_hidden_layers")?,
            renamed("n_positions", "max_position_embeddings")?,
            fixed("scale_attn_weights", Side::Left, Value::Bool(true))?,
            fixed("attention_type", Side::Right, Value::from("scaled_dot_product"))?,
            fixed("use_projection_bias_in_attention", Side::Right, Value::Bool(false))?,
            cs_only("use_ffn_bias_in_attention", Value::Bool(false))?,
            cs_only("use_ffn_bias", Value::Bool(true))?,
            fixed("use_bias_in_output", Side::Right, Value::Bool(true))?,
            renamed("n_inner", "filter_size")?,
            renamed("activation_function", "nonlinearity")?,
            renamed("attn_pdrop", "attention_dropout_rate")?,
            renamed("resid_pdrop", "residual_dropout_rate")?,
            rename("layer_norm_epsilon")?,
            rename("initializer_range")?,
            fixed("embedding_layer_norm", Side::Right, Value::Bool(false))?,
            fixed("fixed_sparse_attention", Side::Right, Value::None)?,
            fixed("norm_first", Side::Right, Value::Bool(true))?,
            fixed("use_ff_layer1_dropout", Side::Right, Value::Bool(false))?,
            fixed("use_untied_layer_norm", Side::Right, Value::Bool(false))?,
        ])?;
        Ok(Self { rules })
    }
}

/// Defaults of the HF `CodeGenConfig` fields the rules read.
fn hf_defaults() -> Vec<(&'static str, Value)> {
    vec![
        ("vocab_size", Value::Int(50400)),
        ("n_positions", Value::Int(2048)),
        ("n_embd", Value::Int(4096)),
        ("n_layer", Value::Int(28)),
        ("n_head", Value::Int(16)),
        ("rotary_dim", Value::Int(64)),
        ("activation_function", Value::from("gelu_new")),
        ("resid_pdrop", Value::Float(0.0)),
        ("embd_pdrop", Value::Float(0.0)),
        ("attn_pdrop", Value::Float(0.0)),
        ("initializer_range", Value::Float(0.02)),
        ("layer_norm_epsilon", Value::Float(1.0e-5)),
        ("tie_word_embeddings", Value::Bool(false)),
    ]
}

/// Defaults of the CS GPT-J model section.
fn cs_defaults() -> Vec<(&'static str, Value)> {
    vec![
        ("max_position_embeddings", Value::Int(1024)),
        ("embedding_dropout_rate", Value::Float(0.1)),
        ("share_embedding_weights", Value::Bool(true)),
        ("residual_dropout_rate", Value::Float(0.1)),
        ("nonlinearity", Value::from("gelu")),
        ("layer_norm_epsilon", Value::Float(1.0e-5)),
        ("use_ffn_bias", Value::Bool(false)),
        ("use_untied_layer_norm", Value::Bool(false)),
        ("attention_dropout_rate", Value::Float(0.1)),
        ("use_projection_bias_in_attention", Value::Bool(true)),
        ("use_ffn_bias_in_attention", Value::Bool(true)),
        ("initializer_range", Value::Float(0.02)),
        ("use_bias_in_output", Value::Bool(false)),
        ("norm_first", Value::Bool(true)),
    ]
}

/// Fields forced on every config converted into CS.
fn cs_forced() -> Vec<(&'static str, Value)> {
    vec![
        ("use_ffn_bias_in_attention", Value::Bool(false)),
        ("use_projection_bias_in_attention", Value::Bool(false)),
        ("use_ffn_bias", Value::Bool(true)),
        ("use_bias_in_output", Value::Bool(true)),
        ("attention_type", Value::from("scaled_dot_product")),
        ("use_untied_layer_norm", Value::Bool(false)),
    ]
}

fn check_heads(config: &NamedValueStore, key: &str) -> Result<()> {
    let heads = config.get_i64(key)?;
    if heads < MIN_HEADS {
        return Err(ConversionError::config(format!(
            "CodeGen does not support {key} < {MIN_HEADS} (got {heads}): the packed attention \
             projection is split into {MIN_HEADS} shards"
        )));
    }
    Ok(())
}

impl ConfigConverter for CodegenConfigConverter {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        (HF, CS17)
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn section(&self, side: Side) -> Option<&'static str> {
        side.pick(None, Some(CS_MODEL_SECTION))
    }

    fn pre_convert(&self, config: &mut NamedValueStore, from: Side) -> Result<()> {
        match from {
            Side::Left => {
                apply_defaults(config, hf_defaults());
                if matches!(config.get("n_inner"), None | Some(Value::None)) {
                    let n_embd = config.get_i64("n_embd")?;
                    config.insert("n_inner", 4 * n_embd);
                }
                check_heads(config, "n_head")
            }
            Side::Right => {
                apply_defaults(config, cs_defaults());
                check_heads(config, "num_heads")
            }
        }
    }

    fn post_convert(
        &self,
        _source: &NamedValueStore,
        target: &mut NamedValueStore,
        from: Side,
    ) -> Result<()> {
        if from == Side::Left {
            target.extend(cs_forced());
        }
        Ok(())
    }
}
