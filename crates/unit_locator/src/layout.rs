//! Declarative hardware identification register layouts.
//!
//! Every supported architecture family maps to a [`RegisterLayout`], an ordered list of bit
//! fields, most significant first. The composite unit identity is built by the same fold for
//! every family, so generations only differ by their table entry:
//!
//! | Family        | Fields (register, offset, width)                          |
//! |---------------|-----------------------------------------------------------|
//! | `Gfx9`        | se (HW_ID, 13, 2), cu (HW_ID, 8, 4)                       |
//! | `Cdna`        | se (HW_ID, 13, 3), cu (HW_ID, 8, 4)                       |
//! | `Cdna3`       | xcc (XCC_ID, 0, 4), se (HW_ID, 13, 2), cu (HW_ID, 8, 4)   |
//! | `Gfx10`       | se (HW_ID1, 18, 2), sa (HW_ID1, 16, 1), wgp (HW_ID1, 10, 4) |
//! | `Gfx11`       | se (HW_ID1, 18, 3), sa (HW_ID1, 16, 1), wgp (HW_ID1, 10, 4) |
//! | `Nvptx`       | sm (%smid, 0, 32)                                         |
//!
//! RDNA families compiled in CU mode append a trailing cu (HW_ID1, 8, 1) field.

use core::fmt;

/// A hardware register holding placement information for the executing wave or warp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// `HW_REG_HW_ID` on GCN and CDNA (gfx9).
    HwId,
    /// `HW_REG_HW_ID1` on RDNA (gfx10 and gfx11).
    HwId1,
    /// `HW_REG_XCC_ID` on CDNA3 (gfx940 to gfx942).
    XccId,
    /// The PTX `%smid` special register.
    SmId,
}

impl Register {
    /// Number of distinct registers, used to size register snapshots.
    pub const COUNT: usize = 4;

    /// Index of the register in the `s_getreg_b32` immediate, `None` for non-AMD registers.
    pub const fn hwreg(self) -> Option<u16> {
        match self {
            Register::HwId => Some(4),
            Register::HwId1 => Some(23),
            Register::XccId => Some(20),
            Register::SmId => None,
        }
    }

    pub(crate) const fn slot(self) -> usize {
        match self {
            Register::HwId => 0,
            Register::HwId1 => 1,
            Register::XccId => 2,
            Register::SmId => 3,
        }
    }
}

/// A contiguous bit field inside a [`Register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Short name of the hardware block the field identifies (`se`, `cu`, `wgp`, ...).
    pub name: &'static str,
    /// Register the field is read from.
    pub register: Register,
    /// Offset of the least significant bit.
    pub offset: u8,
    /// Width in bits, `1..=32`.
    pub width: u8,
}

impl Field {
    /// Creates a field description.
    pub const fn new(name: &'static str, register: Register, offset: u8, width: u8) -> Self {
        Self {
            name,
            register,
            offset,
            width,
        }
    }

    /// Mask of `width` low bits.
    pub const fn mask(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Extracts this field from a raw register value.
    #[inline(always)]
    pub const fn extract(self, raw: u32) -> u32 {
        (raw >> self.offset) & self.mask()
    }

    /// Places `value` at this field's position in an otherwise empty register.
    pub const fn place(self, value: u32) -> u32 {
        (value & self.mask()) << self.offset
    }

    /// The `s_getreg_b32` immediate reading this field: `SIZE-1` in bits 15:11, `OFFSET` in
    /// bits 10:6 and the register index in bits 5:0.
    pub const fn getreg_immediate(self) -> Option<u16> {
        match self.register.hwreg() {
            Some(reg) => Some(((self.width as u16 - 1) << 11) | ((self.offset as u16) << 6) | reg),
            None => None,
        }
    }
}

/// Ordered field list describing how a family packs its unit identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    family: ArchFamily,
    fields: &'static [Field],
}

impl RegisterLayout {
    const fn new(family: ArchFamily, fields: &'static [Field]) -> Self {
        Self { family, fields }
    }

    /// The family this layout belongs to.
    pub const fn family(&self) -> ArchFamily {
        self.family
    }

    /// Fields, most significant first.
    pub const fn fields(&self) -> &'static [Field] {
        self.fields
    }

    /// Total number of bits in a packed identity.
    pub fn id_bits(&self) -> u32 {
        self.fields.iter().map(|f| f.width as u32).sum()
    }

    /// Largest identity this layout can produce.
    pub fn max_unit_id(&self) -> u32 {
        match self.id_bits() {
            bits if bits >= 32 => u32::MAX,
            bits => (1 << bits) - 1,
        }
    }

    /// Builds the unit identity by reading each field's register through `read`.
    ///
    /// This is the single decode algorithm used by every backend.
    #[inline(always)]
    pub fn decode<F: FnMut(Register) -> u32>(&self, mut read: F) -> u32 {
        self.fields
            .iter()
            .fold(0, |acc, field| shift_in(acc, *field, field.extract(read(field.register))))
    }

    /// Packs explicit field values (most significant first) into an identity.
    ///
    /// Returns `None` if the number of values does not match the layout or a value does not
    /// fit its field.
    pub fn pack(&self, values: &[u32]) -> Option<u32> {
        if values.len() != self.fields.len() {
            return None;
        }
        let mut acc = 0;
        for (field, &value) in self.fields.iter().zip(values) {
            if value & !field.mask() != 0 {
                return None;
            }
            acc = shift_in(acc, *field, value);
        }
        Some(acc)
    }

    /// Splits an identity back into `(field, value)` pairs, most significant first.
    pub fn unpack(&self, id: u32) -> impl Iterator<Item = (Field, u32)> + '_ {
        self.fields.iter().enumerate().map(move |(i, field)| {
            let shift: u32 = self.fields[i + 1..].iter().map(|f| f.width as u32).sum();
            (*field, id.checked_shr(shift).unwrap_or(0) & field.mask())
        })
    }

    /// A displayable `name=value` rendering of `id` under this layout.
    pub fn placement(&self, id: u32) -> Placement<'_> {
        Placement { layout: self, id }
    }
}

#[inline(always)]
fn shift_in(acc: u32, field: Field, value: u32) -> u32 {
    acc.checked_shl(field.width as u32).unwrap_or(0) | (value & field.mask())
}

/// `name=value` rendering of a unit identity, e.g. `se=1 sa=0 wgp=3`.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    layout: &'a RegisterLayout,
    id: u32,
}

impl fmt::Display for Placement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, value)) in self.layout.unpack(self.id).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", field.name, value)?;
        }
        Ok(())
    }
}

/// Architecture families with a known identification register layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchFamily {
    /// GCN gfx9 parts (Vega).
    Gfx9,
    /// CDNA and CDNA2 (gfx908, gfx90a).
    Cdna,
    /// CDNA3 (gfx940 to gfx942), partitioned into XCCs.
    Cdna3,
    /// RDNA1/RDNA2 (gfx10xx).
    Gfx10 {
        /// Kernels compiled with `-mcumode`.
        cu_mode: bool,
    },
    /// RDNA3 (gfx11xx).
    Gfx11 {
        /// Kernels compiled with `-mcumode`.
        cu_mode: bool,
    },
    /// NVIDIA GPUs, identified by `%smid`.
    Nvptx,
}

const HW_ID_SE2: Field = Field::new("se", Register::HwId, 13, 2);
const HW_ID_SE3: Field = Field::new("se", Register::HwId, 13, 3);
const HW_ID_CU: Field = Field::new("cu", Register::HwId, 8, 4);
const XCC: Field = Field::new("xcc", Register::XccId, 0, 4);
const HW_ID1_SE2: Field = Field::new("se", Register::HwId1, 18, 2);
const HW_ID1_SE3: Field = Field::new("se", Register::HwId1, 18, 3);
const HW_ID1_SA: Field = Field::new("sa", Register::HwId1, 16, 1);
const HW_ID1_WGP: Field = Field::new("wgp", Register::HwId1, 10, 4);
const HW_ID1_CU: Field = Field::new("cu", Register::HwId1, 8, 1);
const SMID: Field = Field::new("sm", Register::SmId, 0, 32);

const GFX9: RegisterLayout = RegisterLayout::new(ArchFamily::Gfx9, &[HW_ID_SE2, HW_ID_CU]);
const CDNA: RegisterLayout = RegisterLayout::new(ArchFamily::Cdna, &[HW_ID_SE3, HW_ID_CU]);
const CDNA3: RegisterLayout =
    RegisterLayout::new(ArchFamily::Cdna3, &[XCC, HW_ID_SE2, HW_ID_CU]);
const GFX10_WGP: RegisterLayout = RegisterLayout::new(
    ArchFamily::Gfx10 { cu_mode: false },
    &[HW_ID1_SE2, HW_ID1_SA, HW_ID1_WGP],
);
const GFX10_CU: RegisterLayout = RegisterLayout::new(
    ArchFamily::Gfx10 { cu_mode: true },
    &[HW_ID1_SE2, HW_ID1_SA, HW_ID1_WGP, HW_ID1_CU],
);
const GFX11_WGP: RegisterLayout = RegisterLayout::new(
    ArchFamily::Gfx11 { cu_mode: false },
    &[HW_ID1_SE3, HW_ID1_SA, HW_ID1_WGP],
);
const GFX11_CU: RegisterLayout = RegisterLayout::new(
    ArchFamily::Gfx11 { cu_mode: true },
    &[HW_ID1_SE3, HW_ID1_SA, HW_ID1_WGP, HW_ID1_CU],
);
const NVPTX: RegisterLayout = RegisterLayout::new(ArchFamily::Nvptx, &[SMID]);

impl ArchFamily {
    /// Every family, including both RDNA wave modes.
    pub const ALL: [ArchFamily; 8] = [
        ArchFamily::Gfx9,
        ArchFamily::Cdna,
        ArchFamily::Cdna3,
        ArchFamily::Gfx10 { cu_mode: false },
        ArchFamily::Gfx10 { cu_mode: true },
        ArchFamily::Gfx11 { cu_mode: false },
        ArchFamily::Gfx11 { cu_mode: true },
        ArchFamily::Nvptx,
    ];

    /// The register layout of this family.
    pub fn layout(self) -> &'static RegisterLayout {
        match self {
            ArchFamily::Gfx9 => &GFX9,
            ArchFamily::Cdna => &CDNA,
            ArchFamily::Cdna3 => &CDNA3,
            ArchFamily::Gfx10 { cu_mode: false } => &GFX10_WGP,
            ArchFamily::Gfx10 { cu_mode: true } => &GFX10_CU,
            ArchFamily::Gfx11 { cu_mode: false } => &GFX11_WGP,
            ArchFamily::Gfx11 { cu_mode: true } => &GFX11_CU,
            ArchFamily::Nvptx => &NVPTX,
        }
    }

    /// Maps an AMD gfx target name such as `gfx90a` or `gfx90a:sramecc+:xnack-` to its family.
    pub fn from_gfx_target(target: &str, cu_mode: bool) -> Result<Self, TargetError> {
        let name = target.split(':').next().unwrap_or(target);
        let family = match name {
            "gfx900" | "gfx902" | "gfx904" | "gfx906" | "gfx909" | "gfx90c" => ArchFamily::Gfx9,
            "gfx908" | "gfx90a" => ArchFamily::Cdna,
            "gfx940" | "gfx941" | "gfx942" => ArchFamily::Cdna3,
            _ if is_generation(name, "gfx10") => ArchFamily::Gfx10 { cu_mode },
            _ if is_generation(name, "gfx11") => ArchFamily::Gfx11 { cu_mode },
            _ => return Err(TargetError::Unknown),
        };
        if cu_mode && !family.has_wave_modes() {
            return Err(TargetError::CuModeUnsupported);
        }
        Ok(family)
    }

    /// Whether kernels for this family can run in either WGP or CU mode.
    pub const fn has_wave_modes(self) -> bool {
        matches!(self, ArchFamily::Gfx10 { .. } | ArchFamily::Gfx11 { .. })
    }
}

fn is_generation(name: &str, prefix: &str) -> bool {
    name.len() == prefix.len() + 2
        && name.starts_with(prefix)
        && name[prefix.len()..].bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for ArchFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchFamily::Gfx9 => f.write_str("gfx9"),
            ArchFamily::Cdna => f.write_str("cdna"),
            ArchFamily::Cdna3 => f.write_str("cdna3"),
            ArchFamily::Gfx10 { cu_mode } => {
                write!(f, "gfx10 ({} mode)", if *cu_mode { "cu" } else { "wgp" })
            }
            ArchFamily::Gfx11 { cu_mode } => {
                write!(f, "gfx11 ({} mode)", if *cu_mode { "cu" } else { "wgp" })
            }
            ArchFamily::Nvptx => f.write_str("nvptx"),
        }
    }
}

/// Reasons a gfx target name cannot be mapped to a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    /// The target is not one of the supported generations.
    Unknown,
    /// CU mode was requested for a family that only has one wave mode.
    CuModeUnsupported,
}

impl fmt::Display for TargetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::Unknown => f.write_str(
                "unsupported gfx target, expected gfx9xx (gfx900-gfx90c, gfx908, gfx90a, gfx940-gfx942), gfx10xx or gfx11xx",
            ),
            TargetError::CuModeUnsupported => {
                f.write_str("cu mode only applies to gfx10xx and gfx11xx targets")
            }
        }
    }
}

impl core::error::Error for TargetError {}
