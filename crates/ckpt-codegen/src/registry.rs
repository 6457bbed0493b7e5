//! Lookup of CodeGen converters by model name and format pair

use crate::headless::{HeadlessConverter, headless_note};
use crate::lm_head::{LmHeadConverter, lm_head_note};
use crate::{CS18, HF};
use ckpt_common::{ConversionError, FormatVersions, Result, Side};
use ckpt_rules::{CheckpointConverter, PrefixCompat};
use serde::Serialize;

/// Model name of the causal-LM converters.
pub const CODEGEN: &str = "codegen";
/// Model name of the headless converters.
pub const CODEGEN_HEADLESS: &str = "codegen-headless";

/// Registered model names.
pub fn models() -> &'static [&'static str] {
    &[CODEGEN, CODEGEN_HEADLESS]
}

/// Diagnostic summary of one registered converter.
#[derive(Debug, Clone, Serialize)]
pub struct ConverterInfo {
    pub name: &'static str,
    pub formats: [FormatVersions; 2],
    pub note: String,
}

/// Prefix of checkpoints saved through the deprecated CS base-model wrapper.
const LEGACY_CS_PREFIX: &str = "model.";

pub fn codegen_headless_cs18() -> Result<PrefixCompat<HeadlessConverter>> {
    Ok(PrefixCompat::new(HeadlessConverter::new()?, (HF, CS18), "", LEGACY_CS_PREFIX)?
        .with_note(headless_note((HF, CS18))))
}

pub fn codegen_lm_head_cs18() -> Result<PrefixCompat<LmHeadConverter>> {
    Ok(PrefixCompat::new(LmHeadConverter::new()?, (HF, CS18), "", LEGACY_CS_PREFIX)?
        .with_note(lm_head_note((HF, CS18))))
}

/// Every converter registered under `model`, oldest format first.
pub fn converters(model: &str) -> Result<Vec<Box<dyn CheckpointConverter>>> {
    let converters: Vec<Box<dyn CheckpointConverter>> = match model {
        CODEGEN => vec![
            Box::new(LmHeadConverter::new()?) as Box<dyn CheckpointConverter>,
            Box::new(codegen_lm_head_cs18()?),
        ],
        CODEGEN_HEADLESS => vec![
            Box::new(HeadlessConverter::new()?) as Box<dyn CheckpointConverter>,
            Box::new(codegen_headless_cs18()?),
        ],
        _ => {
            return Err(ConversionError::unsupported(
                model,
                format!("no converter registered; known models: {}", models().join(", ")),
            ));
        }
    };
    Ok(converters)
}

/// Find the converter for `model` that bridges `source` to `target`, and the
/// side `source` sits on.
pub fn find(model: &str, source: &str, target: &str) -> Result<(Box<dyn CheckpointConverter>, Side)> {
    for converter in converters(model)? {
        let (left, right) = converter.formats();
        if left.contains(source) && right.contains(target) {
            return Ok((converter, Side::Left));
        }
        if right.contains(source) && left.contains(target) {
            return Ok((converter, Side::Right));
        }
    }
    Err(ConversionError::unsupported(
        model,
        format!("no converter from '{source}' to '{target}'"),
    ))
}

/// Describe every converter registered under `model`.
pub fn describe(model: &str) -> Result<Vec<ConverterInfo>> {
    let name = models()
        .iter()
        .copied()
        .find(|m| *m == model)
        .ok_or_else(|| ConversionError::unsupported(model, "no converter registered"))?;
    Ok(converters(model)?
        .iter()
        .map(|c| {
            let (left, right) = c.formats();
            ConverterInfo { name, formats: [left, right], note: c.converter_note() }
        })
        .collect())
}
