//! CodeGen causal LM (`CodeGenForCausalLM`) <-> CS GPT-J model

use crate::config::CodegenConfigConverter;
use crate::headless::{HeadlessConverter, tie_embeddings};
use crate::{CS17, HF};
use ckpt_common::{FormatVersions, NamedValueStore, Result};
use ckpt_rules::{
    ActionContext, CheckpointConverter, ConfigConverter, ConversionRule, RuleAction, RuleSet, divergent, shared,
};
use std::sync::Arc;

/// Both formats carry a head, so it is a plain rename; the HF body lives
/// under `transformer.` and is handled by the headless rules.
pub struct LmHeadConverter {
    rules: RuleSet,
}

impl LmHeadConverter {
    pub fn new() -> Result<Self> {
        let body = Arc::new(HeadlessConverter::new()?.rules().clone());
        let rules = RuleSet::new(vec![
            ConversionRule::new(vec![shared(r"lm_head\.(?:weight|bias)")], RuleAction::Rename)?,
            ConversionRule::new(vec![divergent("transformer.", "")], RuleAction::Nested(body))?,
        ])?;
        Ok(Self { rules })
    }
}

/// Operator note for the causal-LM converters between `formats`.
pub fn lm_head_note((hf, cs): (FormatVersions, FormatVersions)) -> String {
    format!("{hf} CodeGenForCausalLM <-> {cs} GPTJModel (configured as codegen)")
}

impl CheckpointConverter for LmHeadConverter {
    fn formats(&self) -> (FormatVersions, FormatVersions) {
        (HF, CS17)
    }

    fn converter_note(&self) -> String {
        lm_head_note(self.formats())
    }

    fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn config_converter(&self) -> Option<Box<dyn ConfigConverter>> {
        CodegenConfigConverter::new().ok().map(|c| Box::new(c) as Box<dyn ConfigConverter>)
    }

    fn pre_convert(&self, source: &mut NamedValueStore, ctx: &ActionContext<'_>) -> Result<()> {
        tie_embeddings(source, ctx)
    }
}
