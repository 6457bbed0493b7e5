//! Headless CodeGen model (`CodeGenModel`) <-> CS GPT-J model
//!
//! The HF model has no language-model head; the CS one always has. Going to
//! CS the head is synthesized in `post_convert`; going to HF it is claimed
//! by an existence rule and dropped.

use crate::attention::AttentionConverter;
use crate::config::CodegenConfigConverter;
use crate::{CS17, HF};
use candle_core::{DType, Device, Tensor};
use ckpt_common::{FormatVersions, NamedValueStore, Result, Side, Value};
use ckpt_rules::{
    ActionContext, CheckpointConverter, ConfigConverter, ConversionRule, KeyMatch, RuleAction, RuleSet,
    divergent, shared,
};
use std::sync::Arc;
use tracing::{debug, warn};

const PARAM: &str = r"\.(?:weight|bias)";
const LAYER: &str = r"\.\d+\.";

pub(crate) const WORD_EMBEDDINGS: &str = "embedding_layer.word_embeddings.weight";
pub(crate) const LM_HEAD_WEIGHT: &str = "lm_head.weight";
const LM_HEAD_BIAS: &str = "lm_head.bias";
const HF_EMBEDDINGS: &str = "wte.weight";

/// Standard deviation of a freshly initialized head.
const HEAD_INIT_STD: f32 = 0.02;

pub struct HeadlessConverter {
    rules: RuleSet,
}

impl HeadlessConverter {
    pub fn new() -> Result<Self> {
        let attention = Arc::new(AttentionConverter::new()?.rules().clone());
        let block = |left: &str, right: &str| {
            ConversionRule::new(
                vec![divergent("h", "transformer_decoder.layers"), shared(LAYER), divergent(left, right), shared(PARAM)],
                RuleAction::Rename,
            )
        };

        let rules = RuleSet::new(vec![
            ConversionRule::new(
                vec![divergent("wte", "embedding_layer.word_embeddings"), shared(PARAM)],
                RuleAction::Rename,
            )?,
            ConversionRule::new(
                vec![divergent("ln_f", "transformer_decoder.norm"), shared(PARAM)],
                RuleAction::custom(convert_final_norm),
            )?,
            ConversionRule::new(
                vec![divergent("h", "transformer_decoder.layers"), shared(LAYER), divergent("attn.", "self_attn.")],
                RuleAction::Nested(attention),
            )?,
            block("ln_1", "norm1")?,
            block("mlp.fc_in", "ffn.ffn.0.linear_layer")?,
            block("mlp.fc_out", "ffn.ffn.1.linear_layer")?,
            ConversionRule::exists(vec![shared(r"lm_head\.(?:weight|bias)")], Side::Right)?,
            ConversionRule::exists(vec![shared(r"ln_f\.(?:weight|bias)")], Side::Right)?,
            ConversionRule::exists(vec![shared(r"h\.\d+\.attn\.(?:masked_bias|bias)")], Side::Left)?,
            ConversionRule::exists(vec![shared(r"h\.\d+\.attn\.causal_mask")], Side::Left)?,
            ConversionRule::exists(vec![shared(r"h\.\d+\.attn\.rotary_emb\.inv_freq")], Side::Left)?,
        ])?;
        Ok(Self { rules })
    }
}

/// Operator note for the headless converters between `formats`.
pub fn headless_note((hf, cs): (FormatVersions, FormatVersions)) -> String {
    format!(
        "{hf} CodeGenModel <-> {cs} GPTJModel (configured as codegen)\n\
         The HF model has no language model head but the CS model does. \
         Converting to CS adds a head, copied from the word embeddings when \
         they are tied and randomly initialized otherwise. Converting to HF \
         drops the head."
    )
}

impl CheckpointConverter for HeadlessConverter {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        (HF, CS17)
    }

    fn converter_note(&self) -> String {
        headless_note(self.formats())
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn config_converter(&self) -> Option<Box<dyn ConfigConverter>> {
        CodegenConfigConverter::new().ok().map(|c| Box::new(c) as Box<dyn ConfigConverter>)
    }

    fn pre_convert(&self, source: &mut NamedValueStore, ctx: &ActionContext<'_>) -> Result<()> {
        if ctx.from() == Side::Left {
            let (hf, cs) = self.formats();
            warn!(
                "{} GPTJModel has a language model head (lm_head) while {} CodeGenModel does not; \
                 lm_head will be initialized to defaults",
                cs, hf
            );
        }
        tie_embeddings(source, ctx)
    }

    fn post_convert(
        &self,
        source: &NamedValueStore,
        target: &mut NamedValueStore,
        ctx: &ActionContext<'_>,
    ) -> Result<()> {
        if ctx.from() == Side::Left {
            build_lm_head(source, target, ctx)?;
        }
        Ok(())
    }
}

/// Alias the CS word embeddings from the head when the weights are shared
/// and the embedding slot is empty. Writes into `source`.
pub(crate) fn tie_embeddings(source: &mut NamedValueStore, ctx: &ActionContext<'_>) -> Result<()> {
    if ctx.from() != Side::Right {
        return Ok(());
    }
    let share = match ctx.configs() {
        Ok(configs) => configs.right().get_bool_or("model.share_embedding_weights", true)?,
        Err(_) => true,
    };
    let empty = matches!(source.get(WORD_EMBEDDINGS), None | Some(Value::None));
    if share
        && empty
        && let Some(head) = source.get(LM_HEAD_WEIGHT).cloned()
    {
        debug!("Tying {} to {}", WORD_EMBEDDINGS, LM_HEAD_WEIGHT);
        source.insert(WORD_EMBEDDINGS, head);
    }
    Ok(())
}

fn build_lm_head(source: &NamedValueStore, target: &mut NamedValueStore, ctx: &ActionContext<'_>) -> Result<()> {
    let configs = ctx.configs()?;
    let cs = configs.right();
    let vocab_size = cs.get_usize("model.vocab_size")?;
    let hidden_size = cs.get_usize("model.hidden_size")?;

    let weight = if configs.left().get_bool_or("tie_word_embeddings", false)? {
        debug!("Tying {} to {}", LM_HEAD_WEIGHT, HF_EMBEDDINGS);
        source.tensor(HF_EMBEDDINGS)?.clone()
    } else {
        let dtype = source.tensor(HF_EMBEDDINGS).map(|t| t.dtype()).unwrap_or(DType::F32);
        debug!("Initializing {} as normal(0, {})", LM_HEAD_WEIGHT, HEAD_INIT_STD);
        Tensor::randn(0f32, HEAD_INIT_STD, (vocab_size, hidden_size), &Device::Cpu)?.to_dtype(dtype)?
    };
    target.insert(LM_HEAD_WEIGHT, weight);

    if cs.get_bool_or("model.use_bias_in_output", false)? {
        target.insert(LM_HEAD_BIAS, Tensor::zeros(vocab_size, DType::F32, &Device::Cpu)?);
    }
    Ok(())
}

/// CS keeps the final norm under both names; copy to `ln_f` as well when
/// converting into CS.
fn convert_final_norm(
    m: &KeyMatch<'_>,
    source: &NamedValueStore,
    target: &mut NamedValueStore,
    ctx: &ActionContext<'_>,
) -> Result<()> {
    let value = source.require(m.old_key)?.clone();
    target.insert(m.new_key, value.clone());
    if ctx.from() == Side::Left {
        target.insert(m.new_key.replacen("transformer_decoder.norm.", "ln_f.", 1), value);
    }
    Ok(())
}
