//! Run-time compilation of the generated HIP kernel through hiprtc.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::panic::Location;
use std::ptr;

use libloading::Library;
use tracing::{debug, error};
use unit_locator::ArchFamily;

use super::api::{HIP_LIBRARIES, open_first, symbol};
use crate::error::{Api, DeviceFailure};

type HiprtcResult = c_int;
type Program = *mut c_void;

type HiprtcGetErrorString = unsafe extern "C" fn(HiprtcResult) -> *const c_char;
type HiprtcCreateProgram = unsafe extern "C" fn(
    *mut Program,
    *const c_char,
    *const c_char,
    c_int,
    *const *const c_char,
    *const *const c_char,
) -> HiprtcResult;
type HiprtcCompileProgram =
    unsafe extern "C" fn(Program, c_int, *const *const c_char) -> HiprtcResult;
type HiprtcGetSize = unsafe extern "C" fn(Program, *mut usize) -> HiprtcResult;
type HiprtcGetBytes = unsafe extern "C" fn(Program, *mut c_char) -> HiprtcResult;
type HiprtcDestroyProgram = unsafe extern "C" fn(*mut Program) -> HiprtcResult;

const HIPRTC_SUCCESS: HiprtcResult = 0;

// hiprtc lived inside libamdhip64 before ROCm 5.3
const HIPRTC_LIBRARIES: &[&str] = &[
    "libhiprtc.so",
    "libhiprtc.so.6",
    "libhiprtc.so.5",
    "hiprtc.dll",
    "hiprtc0605.dll",
];

/// Compiler options for `gfx_target`, with the wave mode pinned for families that have one.
pub fn options(gfx_target: &str, family: ArchFamily) -> Vec<String> {
    let mut options = vec![format!("--gpu-architecture={gfx_target}"), "-O3".to_owned()];
    match family {
        ArchFamily::Gfx10 { cu_mode: true } | ArchFamily::Gfx11 { cu_mode: true } => {
            options.push("-mcumode".to_owned())
        }
        ArchFamily::Gfx10 { cu_mode: false } | ArchFamily::Gfx11 { cu_mode: false } => {
            options.push("-mno-cumode".to_owned())
        }
        _ => {}
    }
    options
}

pub struct Hiprtc {
    get_error_string: HiprtcGetErrorString,
    create_program: HiprtcCreateProgram,
    compile_program: HiprtcCompileProgram,
    get_program_log_size: HiprtcGetSize,
    get_program_log: HiprtcGetBytes,
    get_code_size: HiprtcGetSize,
    get_code: HiprtcGetBytes,
    destroy_program: HiprtcDestroyProgram,
    _lib: Library,
}

impl Hiprtc {
    pub fn load() -> Result<Self, DeviceFailure> {
        let lib = open_first(Api::Hiprtc, HIPRTC_LIBRARIES)
            .or_else(|_| open_first(Api::Hiprtc, HIP_LIBRARIES))?;
        unsafe {
            Ok(Self {
                get_error_string: symbol(Api::Hiprtc, &lib, "hiprtcGetErrorString")?,
                create_program: symbol(Api::Hiprtc, &lib, "hiprtcCreateProgram")?,
                compile_program: symbol(Api::Hiprtc, &lib, "hiprtcCompileProgram")?,
                get_program_log_size: symbol(Api::Hiprtc, &lib, "hiprtcGetProgramLogSize")?,
                get_program_log: symbol(Api::Hiprtc, &lib, "hiprtcGetProgramLog")?,
                get_code_size: symbol(Api::Hiprtc, &lib, "hiprtcGetCodeSize")?,
                get_code: symbol(Api::Hiprtc, &lib, "hiprtcGetCode")?,
                destroy_program: symbol(Api::Hiprtc, &lib, "hiprtcDestroyProgram")?,
                _lib: lib,
            })
        }
    }

    fn status(
        &self,
        code: HiprtcResult,
        location: &'static Location<'static>,
    ) -> Result<(), DeviceFailure> {
        if code == HIPRTC_SUCCESS {
            return Ok(());
        }
        let message = unsafe {
            let ptr = (self.get_error_string)(code);
            if ptr.is_null() {
                format!("hiprtcResult {code}")
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(DeviceFailure::at(Api::Hiprtc, message, location))
    }

    /// Compiles `source` into a code object loadable with `hipModuleLoadData`.
    ///
    /// On a compile error the compiler log is emitted at error level before returning.
    #[track_caller]
    pub fn compile(
        &self,
        source: &str,
        name: &str,
        options: &[String],
    ) -> Result<Vec<u8>, DeviceFailure> {
        let location = Location::caller();
        let nul = |_| DeviceFailure::at(Api::Hiprtc, "interior nul byte in program input", location);
        let source = CString::new(source).map_err(nul)?;
        let name = CString::new(name).map_err(nul)?;
        let options = options
            .iter()
            .map(|o| CString::new(o.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(nul)?;
        let option_ptrs: Vec<*const c_char> = options.iter().map(|o| o.as_ptr()).collect();

        let mut raw = ptr::null_mut();
        self.status(
            unsafe {
                (self.create_program)(
                    &mut raw,
                    source.as_ptr(),
                    name.as_ptr(),
                    0,
                    ptr::null(),
                    ptr::null(),
                )
            },
            location,
        )?;
        let program = ProgramGuard { rtc: self, raw };

        debug!(?options, "compiling kernel");
        let compiled = unsafe {
            (self.compile_program)(program.raw, option_ptrs.len() as c_int, option_ptrs.as_ptr())
        };
        if compiled != HIPRTC_SUCCESS {
            match self.read(&program, self.get_program_log_size, self.get_program_log, location) {
                Ok(log) => {
                    let log = String::from_utf8_lossy(&log);
                    error!(log = %log.trim_end_matches('\0'), "hiprtc rejected the kernel")
                }
                Err(e) => error!(%e, "hiprtc rejected the kernel and its log is unavailable"),
            }
            self.status(compiled, location)?;
        }

        let code = self.read(&program, self.get_code_size, self.get_code, location)?;
        debug!(bytes = code.len(), "compiled code object");
        Ok(code)
    }

    fn read(
        &self,
        program: &ProgramGuard<'_>,
        size: HiprtcGetSize,
        bytes: HiprtcGetBytes,
        location: &'static Location<'static>,
    ) -> Result<Vec<u8>, DeviceFailure> {
        let mut len = 0;
        self.status(unsafe { size(program.raw, &mut len) }, location)?;
        let mut buffer = vec![0u8; len];
        self.status(unsafe { bytes(program.raw, buffer.as_mut_ptr().cast()) }, location)?;
        Ok(buffer)
    }
}

struct ProgramGuard<'a> {
    rtc: &'a Hiprtc,
    raw: Program,
}

impl Drop for ProgramGuard<'_> {
    fn drop(&mut self) {
        unsafe { (self.rtc.destroy_program)(&mut self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_pin_the_wave_mode() {
        assert_eq!(
            options("gfx90a", ArchFamily::Cdna),
            ["--gpu-architecture=gfx90a", "-O3"]
        );
        assert_eq!(
            options("gfx1100", ArchFamily::Gfx11 { cu_mode: true }).last().map(String::as_str),
            Some("-mcumode")
        );
        assert_eq!(
            options("gfx1030", ArchFamily::Gfx10 { cu_mode: false }).last().map(String::as_str),
            Some("-mno-cumode")
        );
    }
}
