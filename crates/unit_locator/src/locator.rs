//! The hardware-unit locator capability and its register-driven implementation.

use crate::layout::{Register, RegisterLayout};

/// Reports the compute unit the calling hardware thread is currently scheduled on.
///
/// Implementations never fail: the identity comes from unconditional register reads. If the
/// selected layout does not match the device the value is meaningless, not an error.
pub trait HardwareUnitLocator {
    /// Packed identity of the current compute unit.
    fn current_unit_id(&self) -> u32;
}

impl<T: HardwareUnitLocator + ?Sized> HardwareUnitLocator for &T {
    #[inline(always)]
    fn current_unit_id(&self) -> u32 {
        (**self).current_unit_id()
    }
}

/// Raw access to placement registers, supplied per backend.
pub trait RegisterSource {
    /// Full 32-bit contents of `register`. Registers a backend does not have read as zero.
    fn read(&self, register: Register) -> u32;
}

/// Locator that decodes a [`RegisterLayout`] from a [`RegisterSource`].
#[derive(Debug, Clone, Copy)]
pub struct RegisterLocator<S> {
    layout: &'static RegisterLayout,
    source: S,
}

impl<S: RegisterSource> RegisterLocator<S> {
    /// Creates a locator for `layout` reading registers from `source`.
    pub const fn new(layout: &'static RegisterLayout, source: S) -> Self {
        Self { layout, source }
    }

    /// The layout used for decoding.
    pub const fn layout(&self) -> &'static RegisterLayout {
        self.layout
    }
}

impl<S: RegisterSource> HardwareUnitLocator for RegisterLocator<S> {
    #[inline(always)]
    fn current_unit_id(&self) -> u32 {
        self.layout.decode(|register| self.source.read(register))
    }
}

/// Fixed register contents, used to place simulated groups on host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    values: [u32; Register::COUNT],
}

impl RegisterSnapshot {
    /// Returns a copy with `register` set to `raw`.
    pub const fn with(mut self, register: Register, raw: u32) -> Self {
        self.values[register.slot()] = raw;
        self
    }

    /// Builds the register contents a thread on the unit with the given field values would see.
    ///
    /// Returns `None` under the same conditions as [`RegisterLayout::pack`].
    pub fn from_fields(layout: &RegisterLayout, values: &[u32]) -> Option<Self> {
        layout.pack(values)?;
        let mut snapshot = Self::default();
        for (field, &value) in layout.fields().iter().zip(values) {
            snapshot.values[field.register.slot()] |= field.place(value);
        }
        Some(snapshot)
    }

    /// Builds register contents decoding to `id` under `layout`.
    pub fn from_unit_id(layout: &RegisterLayout, id: u32) -> Self {
        let mut snapshot = Self::default();
        for (field, value) in layout.unpack(id) {
            snapshot.values[field.register.slot()] |= field.place(value);
        }
        snapshot
    }
}

impl RegisterSource for RegisterSnapshot {
    fn read(&self, register: Register) -> u32 {
        self.values[register.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ArchFamily;

    fn unit_of(locator: impl HardwareUnitLocator) -> u32 {
        locator.current_unit_id()
    }

    #[test]
    fn snapshot_round_trips_through_locator() {
        for family in ArchFamily::ALL {
            let layout = family.layout();
            let id = 0b10_1101 & layout.max_unit_id();
            let locator = RegisterLocator::new(layout, RegisterSnapshot::from_unit_id(layout, id));
            assert_eq!(locator.layout().family(), family);
            assert_eq!(locator.current_unit_id(), id, "{family}");
            assert_eq!(unit_of(&locator), id, "{family}");
        }
    }

    #[test]
    fn unrelated_register_bits_are_ignored() {
        let layout = ArchFamily::Cdna.layout();
        // wave id, simd id, pipe id, vm id and me id bits all set
        let noise = 0xff | (0xf << 20) | (0b11 << 30);
        let snapshot = RegisterSnapshot::from_fields(layout, &[6, 11]).unwrap();
        let raw = snapshot.read(Register::HwId) | noise;
        let source = RegisterSnapshot::default().with(Register::HwId, raw);
        let locator = RegisterLocator::new(layout, source);
        assert_eq!(locator.current_unit_id(), (6 << 4) | 11);
    }

    #[test]
    fn from_fields_rejects_overflowing_values() {
        let layout = ArchFamily::Gfx10 { cu_mode: true }.layout();
        assert!(RegisterSnapshot::from_fields(layout, &[0, 2, 0, 0]).is_none());
        assert!(RegisterSnapshot::from_fields(layout, &[3, 1, 15, 1]).is_some());
    }
}
