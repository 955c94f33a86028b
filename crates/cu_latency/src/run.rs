//! Host orchestration shared by all backends.

use tracing::{info, warn};
use unit_locator::{ArchFamily, BUFFER_LEN};

use crate::cli::{BackendConfig, RunConfig};
use crate::error::DeviceFailure;

/// Host staging contents for both device buffers: `value[i] = i`.
pub fn staging() -> Vec<u32> {
    (0..BUFFER_LEN as u32).collect()
}

/// Runs one measurement. The kernel prints the samples; this returns once the device has
/// drained and every buffer has been released.
pub fn run(config: &RunConfig) -> Result<(), DeviceFailure> {
    let layout = config.backend.family().layout();
    let target = config.target;
    if target.unit > layout.max_unit_id() {
        warn!(
            unit = target.unit,
            max = layout.max_unit_id(),
            family = %layout.family(),
            "target identity cannot be produced by this layout, no samples will be printed"
        );
    } else {
        info!(
            unit = target.unit,
            placement = %layout.placement(target.unit),
            start_index = target.start_index,
            family = %layout.family(),
            "probing"
        );
    }

    let staging = staging();
    match &config.backend {
        BackendConfig::Cuda => run_cuda(config, &staging),
        BackendConfig::Rocm { gfx_target, family } => {
            run_rocm(config, gfx_target, *family, &staging)
        }
    }
}

#[cfg(feature = "cuda")]
fn run_cuda(config: &RunConfig, staging: &[u32]) -> Result<(), DeviceFailure> {
    crate::cuda::run(config.device, staging, config.target)
}

#[cfg(not(feature = "cuda"))]
#[track_caller]
fn run_cuda(_: &RunConfig, _: &[u32]) -> Result<(), DeviceFailure> {
    Err(DeviceFailure::new(
        crate::error::Api::Cuda,
        "built without the `cuda` feature",
    ))
}

#[cfg(feature = "rocm")]
fn run_rocm(
    config: &RunConfig,
    gfx_target: &str,
    family: ArchFamily,
    staging: &[u32],
) -> Result<(), DeviceFailure> {
    crate::rocm::run(config.device, gfx_target, family, staging, config.target)
}

#[cfg(not(feature = "rocm"))]
#[track_caller]
fn run_rocm(
    _: &RunConfig,
    _: &str,
    _: ArchFamily,
    _: &[u32],
) -> Result<(), DeviceFailure> {
    Err(DeviceFailure::new(
        crate::error::Api::Hip,
        "built without the `rocm` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_is_the_identity_sequence() {
        let staging = staging();
        assert_eq!(staging.len(), BUFFER_LEN);
        assert_eq!(&staging[..4], &[0, 1, 2, 3]);
        assert_eq!(staging[BUFFER_LEN - 1], BUFFER_LEN as u32 - 1);
    }
}
