//! unit_locator decodes the identity of the compute unit a GPU thread is running on and
//! drives the single-leader latency probe built on top of it.
//!
//! The crate is shared between host and device code. On the host it provides the register
//! layout table, the decode algorithm and the probe logic (exercised through simulated
//! register snapshots); on `target_os = "cuda"` it additionally provides the [`cuda`] module
//! with `%smid`, `%clock64`, atomic claim and `vprintf` backends.
//!
//! The same [`RegisterLayout`] drives every backend: NVIDIA kernels decode it at run time from
//! special registers, and AMD kernels are generated from its `s_getreg_b32` immediates.

#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(target_os = "cuda", no_std, feature(asm_experimental_arch))]

#[cfg(target_os = "cuda")]
extern crate alloc;

#[cfg(target_os = "cuda")]
pub mod cuda;
pub mod layout;
pub mod locator;
pub mod probe;

pub use layout::{ArchFamily, Field, Placement, Register, RegisterLayout, TargetError};
pub use locator::{HardwareUnitLocator, RegisterLocator, RegisterSnapshot, RegisterSource};
pub use probe::{
    BUFFER_LEN, CycleCounter, GROUP_COUNT, GROUP_SIZE, ITERATIONS, LeaderClaim, ProbeTarget,
    SampleSink, StructuralClaim, UnitProbe,
};
