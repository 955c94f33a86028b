use cuda_std::prelude::*;

/// Times `a0[target.start_index] += a1[0]` on the leader of the group placed on SM
/// `target.unit`, printing one cycle count per iteration. Every other thread returns
/// immediately.
#[kernel]
#[allow(improper_ctypes_definitions, clippy::missing_safety_doc)]
pub unsafe fn unit_latency(
    a0: *mut u32,
    a1: *const u32,
    target: unit_locator::ProbeTarget,
    claim: *mut u32,
) {
    use unit_locator::cuda::{Clock64, FirstLeaderClaim, PrintSink, SpecialRegisters};
    use unit_locator::{ArchFamily, RegisterLocator, UnitProbe};

    let locator = RegisterLocator::new(ArchFamily::Nvptx.layout(), SpecialRegisters);
    let probe = UnitProbe::new(locator, Clock64, target);
    unsafe {
        let claim = FirstLeaderClaim::new(claim);
        probe.run(thread::thread_idx_x(), &claim, a0, a1, &mut PrintSink);
    }
}
