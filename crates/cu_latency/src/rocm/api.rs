//! Minimal HIP runtime bindings, resolved from `libamdhip64` at run time.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::panic::Location;
use std::ptr;

use libloading::Library;
use tracing::debug;

use crate::error::{Api, DeviceFailure};

type HipError = c_int;

type HipGetErrorString = unsafe extern "C" fn(HipError) -> *const c_char;
type HipGetDeviceCount = unsafe extern "C" fn(*mut c_int) -> HipError;
type HipSetDevice = unsafe extern "C" fn(c_int) -> HipError;
type HipMalloc = unsafe extern "C" fn(*mut *mut c_void, usize) -> HipError;
type HipFree = unsafe extern "C" fn(*mut c_void) -> HipError;
type HipMemcpyHtoD = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> HipError;
type HipModuleLoadData = unsafe extern "C" fn(*mut *mut c_void, *const c_void) -> HipError;
type HipModuleGetFunction =
    unsafe extern "C" fn(*mut *mut c_void, *mut c_void, *const c_char) -> HipError;
#[allow(clippy::type_complexity)]
type HipModuleLaunchKernel = unsafe extern "C" fn(
    *mut c_void,
    u32,
    u32,
    u32,
    u32,
    u32,
    u32,
    u32,
    *mut c_void,
    *mut *mut c_void,
    *mut *mut c_void,
) -> HipError;
type HipDeviceSynchronize = unsafe extern "C" fn() -> HipError;
type HipModuleUnload = unsafe extern "C" fn(*mut c_void) -> HipError;

const HIP_SUCCESS: HipError = 0;

pub(super) const HIP_LIBRARIES: &[&str] = &[
    "libamdhip64.so",
    "libamdhip64.so.6",
    "libamdhip64.so.5",
    "amdhip64.dll",
];

/// Opens the first library in `names` that loads.
pub(super) fn open_first(api: Api, names: &[&str]) -> Result<Library, DeviceFailure> {
    let mut last_error = None;
    for name in names {
        match unsafe { Library::new(name) } {
            Ok(lib) => {
                debug!(library = name, "loaded");
                return Ok(lib);
            }
            Err(e) => last_error = Some(e),
        }
    }
    let message = match last_error {
        Some(e) => format!("unable to load {}: {e}", names.join(", ")),
        None => "no library names to load".to_owned(),
    };
    Err(DeviceFailure::new(api, message))
}

/// Copies a function pointer out of `lib`.
///
/// # Safety
///
/// `T` must be the exact signature of `name`, and the returned pointer must not outlive `lib`.
pub(super) unsafe fn symbol<T: Copy>(
    api: Api,
    lib: &Library,
    name: &str,
) -> Result<T, DeviceFailure> {
    unsafe { lib.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|e| DeviceFailure::new(api, format!("missing symbol {name}: {e}")))
}

pub struct Hip {
    get_error_string: HipGetErrorString,
    get_device_count: HipGetDeviceCount,
    set_device: HipSetDevice,
    malloc: HipMalloc,
    free: HipFree,
    memcpy_htod: HipMemcpyHtoD,
    module_load_data: HipModuleLoadData,
    module_get_function: HipModuleGetFunction,
    module_launch_kernel: HipModuleLaunchKernel,
    device_synchronize: HipDeviceSynchronize,
    module_unload: HipModuleUnload,
    // keeps every pointer above valid
    _lib: Library,
}

impl Hip {
    pub fn load() -> Result<Self, DeviceFailure> {
        let lib = open_first(Api::Hip, HIP_LIBRARIES)?;
        unsafe {
            Ok(Self {
                get_error_string: symbol(Api::Hip, &lib, "hipGetErrorString")?,
                get_device_count: symbol(Api::Hip, &lib, "hipGetDeviceCount")?,
                set_device: symbol(Api::Hip, &lib, "hipSetDevice")?,
                malloc: symbol(Api::Hip, &lib, "hipMalloc")?,
                free: symbol(Api::Hip, &lib, "hipFree")?,
                memcpy_htod: symbol(Api::Hip, &lib, "hipMemcpyHtoD")?,
                module_load_data: symbol(Api::Hip, &lib, "hipModuleLoadData")?,
                module_get_function: symbol(Api::Hip, &lib, "hipModuleGetFunction")?,
                module_launch_kernel: symbol(Api::Hip, &lib, "hipModuleLaunchKernel")?,
                device_synchronize: symbol(Api::Hip, &lib, "hipDeviceSynchronize")?,
                module_unload: symbol(Api::Hip, &lib, "hipModuleUnload")?,
                _lib: lib,
            })
        }
    }

    fn status(
        &self,
        code: HipError,
        location: &'static Location<'static>,
    ) -> Result<(), DeviceFailure> {
        if code == HIP_SUCCESS {
            return Ok(());
        }
        let message = unsafe {
            let ptr = (self.get_error_string)(code);
            if ptr.is_null() {
                format!("hipError_t {code}")
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(DeviceFailure::at(Api::Hip, message, location))
    }

    #[track_caller]
    pub fn device_count(&self) -> Result<u32, DeviceFailure> {
        let location = Location::caller();
        let mut count = 0;
        self.status(unsafe { (self.get_device_count)(&mut count) }, location)?;
        Ok(count.max(0) as u32)
    }

    #[track_caller]
    pub fn set_device(&self, ordinal: u32) -> Result<(), DeviceFailure> {
        let location = Location::caller();
        let ordinal = c_int::try_from(ordinal)
            .map_err(|_| DeviceFailure::at(Api::Hip, "device ordinal out of range", location))?;
        self.status(unsafe { (self.set_device)(ordinal) }, location)
    }

    /// Allocates device memory for `data` and copies it over.
    #[track_caller]
    pub fn upload(&self, data: &[u32]) -> Result<HipBuffer<'_>, DeviceFailure> {
        let location = Location::caller();
        let bytes = mem::size_of_val(data);
        let mut raw = ptr::null_mut();
        self.status(unsafe { (self.malloc)(&mut raw, bytes) }, location)?;
        let buffer = HipBuffer { hip: self, raw };
        self.status(
            unsafe { (self.memcpy_htod)(buffer.raw, data.as_ptr().cast(), bytes) },
            location,
        )?;
        Ok(buffer)
    }

    #[track_caller]
    pub fn load_module(&self, image: &[u8]) -> Result<HipModule<'_>, DeviceFailure> {
        let location = Location::caller();
        let mut raw = ptr::null_mut();
        self.status(
            unsafe { (self.module_load_data)(&mut raw, image.as_ptr().cast()) },
            location,
        )?;
        Ok(HipModule { hip: self, raw })
    }

    /// Launches `function` on a 1D grid on the null stream.
    ///
    /// # Safety
    ///
    /// `params` must hold one pointer per kernel parameter, each pointing at a value of the
    /// parameter's type that stays alive until the kernel has completed.
    #[track_caller]
    pub unsafe fn launch(
        &self,
        function: HipFunction<'_>,
        groups: u32,
        group_size: u32,
        params: &mut [*mut c_void],
    ) -> Result<(), DeviceFailure> {
        let location = Location::caller();
        let code = unsafe {
            (self.module_launch_kernel)(
                function.raw,
                groups,
                1,
                1,
                group_size,
                1,
                1,
                0,
                ptr::null_mut(),
                params.as_mut_ptr(),
                ptr::null_mut(),
            )
        };
        self.status(code, location)
    }

    #[track_caller]
    pub fn synchronize(&self) -> Result<(), DeviceFailure> {
        let location = Location::caller();
        self.status(unsafe { (self.device_synchronize)() }, location)
    }
}

/// Device allocation freed on drop; [`HipBuffer::free`] reports the result instead.
pub struct HipBuffer<'a> {
    hip: &'a Hip,
    raw: *mut c_void,
}

impl HipBuffer<'_> {
    pub fn as_raw(&self) -> *mut c_void {
        self.raw
    }

    #[track_caller]
    pub fn free(self) -> Result<(), DeviceFailure> {
        let location = Location::caller();
        let me = ManuallyDrop::new(self);
        me.hip.status(unsafe { (me.hip.free)(me.raw) }, location)
    }
}

impl Drop for HipBuffer<'_> {
    fn drop(&mut self) {
        unsafe { (self.hip.free)(self.raw) };
    }
}

/// Loaded code object, unloaded on drop; [`HipModule::unload`] reports the result instead.
pub struct HipModule<'a> {
    hip: &'a Hip,
    raw: *mut c_void,
}

impl HipModule<'_> {
    #[track_caller]
    pub fn function(&self, name: &str) -> Result<HipFunction<'_>, DeviceFailure> {
        let location = Location::caller();
        let name = CString::new(name)
            .map_err(|_| DeviceFailure::at(Api::Hip, "kernel name contains a nul byte", location))?;
        let mut raw = ptr::null_mut();
        self.hip.status(
            unsafe { (self.hip.module_get_function)(&mut raw, self.raw, name.as_ptr()) },
            location,
        )?;
        Ok(HipFunction {
            raw,
            _module: PhantomData,
        })
    }

    #[track_caller]
    pub fn unload(self) -> Result<(), DeviceFailure> {
        let location = Location::caller();
        let me = ManuallyDrop::new(self);
        me.hip.status(unsafe { (me.hip.module_unload)(me.raw) }, location)
    }
}

impl Drop for HipModule<'_> {
    fn drop(&mut self) {
        unsafe { (self.hip.module_unload)(self.raw) };
    }
}

/// Kernel handle, valid while its module is loaded.
#[derive(Clone, Copy)]
pub struct HipFunction<'m> {
    raw: *mut c_void,
    _module: PhantomData<&'m ()>,
}
