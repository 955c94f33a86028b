//! CUDA backend: runs the `unit_latency` PTX kernel through the driver API.

use cust::context::{Context, ContextFlags};
use cust::device::{Device, DeviceAttribute};
use cust::launch;
use cust::memory::{DeviceBox, DeviceBuffer};
use cust::module::Module;
use cust::stream::{Stream, StreamFlags};
use cust::CudaFlags;
use tracing::{debug, info, warn};
use unit_locator::{BUFFER_LEN, GROUP_COUNT, GROUP_SIZE, ProbeTarget};

use crate::error::{Check, DeviceFailure};

static PTX: &str = include_str!(concat!(env!("OUT_DIR"), "/kernels.ptx"));

pub fn run(ordinal: u32, staging: &[u32], target: ProbeTarget) -> Result<(), DeviceFailure> {
    cust::init(CudaFlags::empty()).check()?;
    let device = Device::get_device(ordinal).check()?;
    // the context must outlive every allocation below
    let ctx = Context::new(device).check()?;
    ctx.set_flags(ContextFlags::SCHED_AUTO).check()?;
    describe(device, target)?;

    let module = Module::from_ptx(PTX, &[]).check()?;
    let stream = Stream::new(StreamFlags::NON_BLOCKING, None).check()?;

    let a0 = DeviceBuffer::from_slice(staging).check()?;
    let a1 = DeviceBuffer::from_slice(staging).check()?;
    let claim = DeviceBox::new(&0u32).check()?;

    let unit_latency = module.get_function("unit_latency").check()?;
    debug!(groups = GROUP_COUNT, group_size = GROUP_SIZE, "launching unit_latency");
    unsafe {
        launch!(
            unit_latency<<<GROUP_COUNT, GROUP_SIZE, 0, stream>>>(
                a0.as_device_ptr(),
                a1.as_device_ptr(),
                target,
                claim.as_device_ptr(),
            )
        )
        .check()?;
    }
    // also flushes the device printf buffer
    stream.synchronize().check()?;

    DeviceBuffer::drop(a0).check()?;
    DeviceBuffer::drop(a1).check()?;
    DeviceBox::drop(claim).check()?;
    Module::drop(module).check()?;
    Stream::drop(stream).check()?;
    Context::drop(ctx).check()?;
    Ok(())
}

fn describe(device: Device, target: ProbeTarget) -> Result<(), DeviceFailure> {
    let name = device.name().check()?;
    let units = device
        .get_attribute(DeviceAttribute::MultiprocessorCount)
        .check()?;
    let l2_bytes = device.get_attribute(DeviceAttribute::L2CacheSize).check()?;
    info!(device = %name, units, l2_bytes, "using CUDA device");

    let units = units.max(0) as u32;
    if units > GROUP_COUNT {
        warn!(
            units,
            groups = GROUP_COUNT,
            "device has more multiprocessors than launched groups, some will never be probed"
        );
    }
    if target.unit >= units {
        warn!(sm = target.unit, units, "target SM does not exist on this device");
    }
    let buffer_bytes = BUFFER_LEN * size_of::<u32>();
    if buffer_bytes >= l2_bytes.max(0) as usize {
        warn!(
            buffer_bytes,
            l2_bytes, "buffers exceed the L2 cache, accesses will reach device memory"
        );
    }
    Ok(())
}
