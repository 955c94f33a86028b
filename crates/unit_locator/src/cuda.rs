//! Device-side backends for NVIDIA GPUs.

use core::arch::asm;
use core::sync::atomic::Ordering;

use cuda_std::atomic::mid::atomic_compare_and_swap_u32_device;

use crate::layout::Register;
use crate::locator::RegisterSource;
use crate::probe::{CycleCounter, LeaderClaim, SampleSink};

/// Returns the id of the streaming multiprocessor the calling thread runs on.
///
/// The value can change over the lifetime of a thread if it is preempted and rescheduled.
#[inline(always)]
pub fn smid() -> u32 {
    let id;
    unsafe {
        asm!(
            "mov.u32 {}, %smid;",
            out(reg32) id
        )
    }
    id
}

/// Register source backed by PTX special registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialRegisters;

impl RegisterSource for SpecialRegisters {
    #[inline(always)]
    fn read(&self, register: Register) -> u32 {
        match register {
            Register::SmId => smid(),
            _ => 0,
        }
    }
}

/// The per-multiprocessor `%clock64` counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock64;

impl CycleCounter for Clock64 {
    #[inline(always)]
    fn now(&self) -> u64 {
        cuda_std::misc::clock()
    }
}

/// First leader to swap the claim word from 0 to 1 wins.
#[derive(Debug, Clone, Copy)]
pub struct FirstLeaderClaim {
    word: *mut u32,
}

impl FirstLeaderClaim {
    /// Wraps the claim word shared by all groups of a launch.
    ///
    /// # Safety
    ///
    /// `word` must point to device memory initialized to zero before the launch.
    pub unsafe fn new(word: *mut u32) -> Self {
        Self { word }
    }
}

impl LeaderClaim for FirstLeaderClaim {
    #[inline(always)]
    fn try_claim(&self) -> bool {
        unsafe { atomic_compare_and_swap_u32_device(self.word, 0, 1, Ordering::Relaxed) == 0 }
    }
}

/// Prints each sample as one decimal line through the device `vprintf` buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintSink;

impl SampleSink for PrintSink {
    #[inline(always)]
    fn record(&mut self, _iteration: usize, latency: u64) {
        cuda_std::println!("{}", latency);
    }
}
