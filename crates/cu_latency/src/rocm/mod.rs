//! ROCm backend: generates the probe kernel for the selected register layout, compiles it with
//! hiprtc for the requested gfx target and runs it through the HIP module API.

mod api;
mod jit;
mod source;

use std::ffi::c_void;

use tracing::{debug, info};
use unit_locator::{ArchFamily, GROUP_COUNT, GROUP_SIZE, ProbeTarget};

use crate::error::{Api, DeviceFailure};
use api::Hip;
use jit::Hiprtc;
use source::KERNEL_NAME;

pub fn run(
    ordinal: u32,
    gfx_target: &str,
    family: ArchFamily,
    staging: &[u32],
    target: ProbeTarget,
) -> Result<(), DeviceFailure> {
    let hip = Hip::load()?;
    let devices = hip.device_count()?;
    info!(devices, ordinal, gfx_target, "using HIP device");
    hip.set_device(ordinal)?;

    let source = source::kernel_source(family.layout()).ok_or_else(|| {
        DeviceFailure::new(Api::Hiprtc, format!("{family} unit ids cannot be read with s_getreg"))
    })?;
    debug!(%source, "generated kernel");
    let code = Hiprtc::load()?.compile(
        &source,
        "unit_latency.hip",
        &jit::options(gfx_target, family),
    )?;

    let module = hip.load_module(&code)?;
    let function = module.function(KERNEL_NAME)?;

    let a0 = hip.upload(staging)?;
    let a1 = hip.upload(staging)?;
    let claim = hip.upload(&[0])?;

    let mut a0_ptr = a0.as_raw();
    let mut a1_ptr = a1.as_raw();
    let mut start_index = target.start_index;
    let mut unit = target.unit;
    let mut claim_ptr = claim.as_raw();
    let mut params: [*mut c_void; 5] = [
        (&raw mut a0_ptr).cast(),
        (&raw mut a1_ptr).cast(),
        (&raw mut start_index).cast(),
        (&raw mut unit).cast(),
        (&raw mut claim_ptr).cast(),
    ];
    debug!(groups = GROUP_COUNT, group_size = GROUP_SIZE, "launching {KERNEL_NAME}");
    unsafe { hip.launch(function, GROUP_COUNT, GROUP_SIZE, &mut params)? };
    // also flushes the device printf buffer
    hip.synchronize()?;

    a0.free()?;
    a1.free()?;
    claim.free()?;
    module.unload()?;
    Ok(())
}
