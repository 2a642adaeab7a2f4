// config.rs — Runtime configuration for the transform.
//
// Every field has a default, so an empty JSON object is a valid config:
//
//   {
//     "block_extent": 16,
//     "padding": 16,
//     "alignment": 32,
//     "num_levels": 3,
//     "start_level": 0,
//     "schedule": "fifo",
//     "serialize": false,
//     "profile": "native",
//     "cornerness_exponent": 0.25
//   }
//
// `validate()` checks the operator invariants up front so that a bad file
// fails with `Error::Configuration` before any device work is issued.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::accel::queue::SchedulePolicy;
use crate::error::{ensure_config, Result};
use crate::filters::DualTreeFilters;
use crate::gpu::device::{max_invocations_for_profile, DeviceProfile};
use crate::ops::cornerness::DEFAULT_EXPONENT;

/// Transform and queue configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DtcwtConfig {
    /// Side of the square workgroup tile. Bounds the filter halo.
    pub block_extent: usize,
    /// Pixels of padding on each side of every real image buffer.
    pub padding: usize,
    /// Row stride and slice height alignment, in elements.
    pub alignment: usize,
    /// Total DTCWT depth, counting skipped levels. Configs that count only
    /// the produced levels need `start_level` added to get this value.
    pub num_levels: usize,
    /// Number of leading levels that only run the lowpass chain.
    pub start_level: usize,
    /// Order in which independent commands are submitted.
    pub schedule: SchedulePolicy,
    /// Make every command wait on its predecessor.
    pub serialize: bool,
    /// Device limits profile for the wgpu backend.
    pub profile: DeviceProfile,
    /// Power applied to the product of the six subband magnitudes.
    pub cornerness_exponent: f32,
}

impl Default for DtcwtConfig {
    fn default() -> Self {
        DtcwtConfig {
            block_extent: 16,
            padding: 16,
            alignment: 32,
            num_levels: 3,
            start_level: 0,
            schedule: SchedulePolicy::Fifo,
            serialize: false,
            profile: DeviceProfile::Native,
            cornerness_exponent: DEFAULT_EXPONENT,
        }
    }
}

impl DtcwtConfig {
    /// Check the configuration against the fixed filter set and the profile.
    pub fn validate(&self) -> Result<()> {
        ensure_config!(self.block_extent > 0, "block_extent must be positive");
        ensure_config!(self.alignment > 0, "alignment must be positive");
        ensure_config!(self.num_levels > 0, "num_levels must be at least 1");
        ensure_config!(
            self.start_level < self.num_levels,
            "start_level ({}) must be below num_levels ({})",
            self.start_level,
            self.num_levels,
        );
        ensure_config!(
            self.padding >= self.block_extent,
            "padding ({}) must be at least the block extent ({})",
            self.padding,
            self.block_extent,
        );

        ensure_config!(
            self.cornerness_exponent.is_finite() && self.cornerness_exponent > 0.0,
            "cornerness_exponent must be positive and finite (got {})",
            self.cornerness_exponent,
        );

        let needed = DualTreeFilters::standard().required_block_extent();
        ensure_config!(
            self.block_extent >= needed,
            "block_extent ({}) too small for the dual-tree filters (need {needed})",
            self.block_extent,
        );

        let invocations = (self.block_extent * self.block_extent) as u64;
        let max = max_invocations_for_profile(self.profile) as u64;
        ensure_config!(
            invocations <= max,
            "block_extent {0}×{0} = {invocations} invocations exceeds the {1} limit of {max}",
            self.block_extent,
            self.profile,
        );
        Ok(())
    }
}

/// Read and validate a JSON configuration file.
pub fn load_config(path: &Path) -> Result<DtcwtConfig> {
    let contents = fs::read_to_string(path)?;
    let config: DtcwtConfig = serde_json::from_str(&contents)?;
    config.validate()?;
    log::debug!("loaded config from {}: {config:?}", path.display());
    Ok(config)
}
