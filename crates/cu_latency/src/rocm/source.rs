//! HIP source for the probe kernel, generated from a [`RegisterLayout`].
//!
//! The identity decode is unrolled into one `s_getreg_b32` per field, in the same order and
//! with the same widths as [`RegisterLayout::decode`], so a unit id printed by the host and the
//! one compared on the device always agree.

use std::fmt::Write;

use unit_locator::{ITERATIONS, RegisterLayout};

pub const KERNEL_NAME: &str = "unit_latency";

/// Returns `None` if a field of `layout` is not readable with `s_getreg_b32`.
pub fn kernel_source(layout: &RegisterLayout) -> Option<String> {
    let mut decode = String::new();
    for field in layout.fields() {
        let immediate = field.getreg_immediate()?;
        writeln!(
            decode,
            "    unit = (unit << {}u) | __builtin_amdgcn_s_getreg({immediate}); // {}",
            field.width, field.name
        )
        .ok()?;
    }

    Some(format!(
        r#"#include <hip/hip_runtime.h>

extern "C" __global__ void {KERNEL_NAME}(unsigned int* a0, const unsigned int* a1,
                                     unsigned int start_index, unsigned int target,
                                     unsigned int* claim)
{{
    unsigned int unit = 0u;
{decode}    if (unit != target || threadIdx.x != 0) {{
        return;
    }}
    if (atomicCAS(claim, 0u, 1u) != 0u) {{
        return;
    }}
    volatile unsigned int* dst = a0 + start_index;
    const volatile unsigned int* src = a1;
    for (unsigned int i = 0; i < {ITERATIONS}u; ++i) {{
        unsigned long long start = clock64();
        *dst += *src;
        unsigned long long latency = clock64() - start;
        printf("%llu\n", latency);
    }}
}}
"#
    ))
}
