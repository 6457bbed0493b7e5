//! Config-then-checkpoint conversion

use crate::action::ConfigPair;
use crate::checkpoint::CheckpointConverter;
use ckpt_common::{ConversionError, NamedValueStore, Result, Side};

/// Target checkpoint and config produced by [`convert_with_config`].
#[derive(Debug, Clone)]
pub struct Converted {
    pub checkpoint: NamedValueStore,
    pub config: NamedValueStore,
}

/// Convert a checkpoint together with its config record.
///
/// The config goes first, so unsupported settings fail before any tensor
/// is touched. The source record with its defaults filled, and the
/// converted record, then form the [`ConfigPair`] the checkpoint actions
/// consult.
pub fn convert_with_config(
    converter: &dyn CheckpointConverter,
    checkpoint: &mut NamedValueStore,
    config: &NamedValueStore,
    from: Side,
    drop_unmatched_keys: bool,
) -> Result<Converted> {
    let config_converter = converter.config_converter().ok_or_else(|| {
        let (left, right) = converter.formats();
        ConversionError::config(format!("no config converter between {left} and {right}"))
    })?;

    let (source_config, target_config) =
        config_converter.convert_with_source(config, from, drop_unmatched_keys)?;
    let configs = ConfigPair::from_source(from, source_config, target_config.clone());
    let target = converter.convert(checkpoint, from, Some(&configs), drop_unmatched_keys)?;

    Ok(Converted { checkpoint: target, config: target_config })
}
