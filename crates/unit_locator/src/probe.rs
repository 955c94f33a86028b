//! Placement-filtered, cycle-timed read-modify-write.
//!
//! Every launched thread constructs a [`UnitProbe`] and calls [`UnitProbe::run`]. Only the
//! leader (local index 0) of a group whose unit identity equals the target goes on to time
//! `A0[start_index] += A1[0]`; every other thread returns without touching memory or emitting
//! anything.

use crate::locator::HardwareUnitLocator;

/// Number of timed iterations, and therefore samples, per run.
pub const ITERATIONS: usize = 5;

/// Threads per execution group. Also the scale applied to the start unit.
pub const GROUP_SIZE: u32 = 64;

/// Execution groups per launch, an upper bound on the unit count of supported devices.
pub const GROUP_COUNT: u32 = 120;

/// Elements in each of the two buffers. 2 MiB of `u32`, below the L2 size of every target.
pub const BUFFER_LEN: usize = ((8 * 1024) * 1024) / 16;

/// Free-running cycle counter readable from device code.
pub trait CycleCounter {
    /// Current counter value.
    fn now(&self) -> u64;
}

/// Destination of latency samples.
pub trait SampleSink {
    /// Records the latency measured in `iteration`.
    fn record(&mut self, iteration: usize, latency: u64);
}

/// Tie-break between leaders that all report the target identity.
///
/// With a fixed grid, more than one group can land on the same unit. Exactly one caller of
/// `try_claim` may observe `true`; that caller becomes the single writer of `A0`.
pub trait LeaderClaim {
    /// Attempts to become the single writer.
    fn try_claim(&self) -> bool;
}

/// Claim for launches where the target identity is matched by at most one group.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralClaim;

impl LeaderClaim for StructuralClaim {
    #[inline(always)]
    fn try_claim(&self) -> bool {
        true
    }
}

/// Operator-selected measurement target, passed by value to the kernel.
#[cfg_attr(not(target_os = "cuda"), derive(cust_core::DeviceCopy))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ProbeTarget {
    /// Element of `A0` that is read, modified and written.
    pub start_index: u32,
    /// Identity of the compute unit that must perform the measurement.
    pub unit: u32,
}

impl ProbeTarget {
    /// Creates a target from an already range-checked start index.
    pub const fn new(start_index: u32, unit: u32) -> Self {
        Self { start_index, unit }
    }

    /// Scales `start_unit` by [`GROUP_SIZE`], returning `None` if the resulting index is not
    /// inside the buffers.
    pub const fn from_start_unit(start_unit: u32, unit: u32) -> Option<Self> {
        match start_unit.checked_mul(GROUP_SIZE) {
            Some(index) if (index as usize) < BUFFER_LEN => Some(Self::new(index, unit)),
            _ => None,
        }
    }
}

/// Per-thread probe state.
#[derive(Debug, Clone, Copy)]
pub struct UnitProbe<L, C> {
    locator: L,
    counter: C,
    target: ProbeTarget,
}

impl<L: HardwareUnitLocator, C: CycleCounter> UnitProbe<L, C> {
    /// Creates the probe for one thread.
    pub const fn new(locator: L, counter: C, target: ProbeTarget) -> Self {
        Self {
            locator,
            counter,
            target,
        }
    }

    /// Whether a thread with `local_index` is the leader of a group placed on the target unit.
    #[inline(always)]
    pub fn is_target_leader(&self, local_index: u32) -> bool {
        self.locator.current_unit_id() == self.target.unit && local_index == 0
    }

    /// Runs the probe for the calling thread. Returns `true` if this thread performed the
    /// timed block and emitted [`ITERATIONS`] samples.
    ///
    /// # Safety
    ///
    /// `a0` must be valid for reads and writes at `start_index`, and `a1` valid for a read at
    /// index 0, for the duration of the call. No other thread may access `a0[start_index]`
    /// while the selected leader runs; `claim` must hand out at most one `true` per launch
    /// unless the target identity is unique to a single group.
    #[inline(always)]
    pub unsafe fn run<K: LeaderClaim, S: SampleSink>(
        &self,
        local_index: u32,
        claim: &K,
        a0: *mut u32,
        a1: *const u32,
        sink: &mut S,
    ) -> bool {
        if !self.is_target_leader(local_index) || !claim.try_claim() {
            return false;
        }
        let dst = unsafe { a0.add(self.target.start_index as usize) };
        for iteration in 0..ITERATIONS {
            let start = self.counter.now();
            unsafe { read_modify_write(dst, a1) };
            let latency = self.counter.now().wrapping_sub(start);
            sink.record(iteration, latency);
        }
        true
    }
}

/// `*dst += *src` with volatile accesses so the timed memory traffic is never elided or hoisted.
#[inline(always)]
unsafe fn read_modify_write(dst: *mut u32, src: *const u32) {
    unsafe {
        let value = core::ptr::read_volatile(src);
        let current = core::ptr::read_volatile(dst);
        core::ptr::write_volatile(dst, current.wrapping_add(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct FixedUnit(u32);

    impl HardwareUnitLocator for FixedUnit {
        fn current_unit_id(&self) -> u32 {
            self.0
        }
    }

    /// Advances by `step` on every read.
    struct Ticks {
        now: Cell<u64>,
        step: u64,
    }

    impl CycleCounter for Ticks {
        fn now(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now.wrapping_add(self.step));
            now
        }
    }

    impl SampleSink for Vec<(usize, u64)> {
        fn record(&mut self, iteration: usize, latency: u64) {
            self.push((iteration, latency));
        }
    }

    fn ticks(start: u64, step: u64) -> Ticks {
        Ticks {
            now: Cell::new(start),
            step,
        }
    }

    #[test]
    fn buffers_fit_the_l2_budget() {
        assert_eq!(BUFFER_LEN, 524_288);
        assert!(BUFFER_LEN * size_of::<u32>() < 4 * 1024 * 1024);
    }

    #[test]
    fn start_unit_is_scaled_and_bounded() {
        assert_eq!(ProbeTarget::from_start_unit(0, 7), Some(ProbeTarget::new(0, 7)));
        assert_eq!(ProbeTarget::from_start_unit(3, 0).map(|t| t.start_index), Some(192));
        let last = (BUFFER_LEN as u32 - 1) / GROUP_SIZE;
        assert!(ProbeTarget::from_start_unit(last, 0).is_some());
        assert_eq!(ProbeTarget::from_start_unit(last + 1, 0), None);
        assert_eq!(ProbeTarget::from_start_unit(u32::MAX, 0), None);
    }

    #[test]
    fn leader_on_target_emits_ordered_samples() {
        let mut a0: Vec<u32> = (0..128).collect();
        let a1: Vec<u32> = vec![3; 128];
        let probe = UnitProbe::new(FixedUnit(9), ticks(100, 7), ProbeTarget::new(64, 9));
        let mut samples = Vec::new();
        let ran = unsafe { probe.run(0, &StructuralClaim, a0.as_mut_ptr(), a1.as_ptr(), &mut samples) };
        assert!(ran);
        assert_eq!(samples, (0..ITERATIONS).map(|i| (i, 7)).collect::<Vec<_>>());
        assert_eq!(a0[64], 64 + 3 * ITERATIONS as u32);
        assert!(a0.iter().enumerate().all(|(i, &v)| i == 64 || v == i as u32));
    }

    #[test]
    fn non_leaders_and_other_units_stay_idle() {
        let mut a0 = vec![0u32; 4];
        let a1 = vec![1u32; 4];
        let mut samples = Vec::new();

        let follower = UnitProbe::new(FixedUnit(2), ticks(0, 1), ProbeTarget::new(0, 2));
        assert!(!unsafe { follower.run(1, &StructuralClaim, a0.as_mut_ptr(), a1.as_ptr(), &mut samples) });

        let elsewhere = UnitProbe::new(FixedUnit(3), ticks(0, 1), ProbeTarget::new(0, 2));
        assert!(!unsafe { elsewhere.run(0, &StructuralClaim, a0.as_mut_ptr(), a1.as_ptr(), &mut samples) });

        assert!(samples.is_empty());
        assert_eq!(a0, vec![0; 4]);
    }

    #[test]
    fn counter_wraparound_yields_small_latency() {
        let mut a0 = vec![0u32; 1];
        let a1 = vec![1u32; 1];
        let probe = UnitProbe::new(FixedUnit(0), ticks(u64::MAX - 2, 5), ProbeTarget::new(0, 0));
        let mut samples = Vec::new();
        unsafe { probe.run(0, &StructuralClaim, a0.as_mut_ptr(), a1.as_ptr(), &mut samples) };
        assert!(samples.iter().all(|&(_, latency)| latency == 5));
    }
}
