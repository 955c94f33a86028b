//! Fatal device API failures.
//!
//! Every device call is checked at its call site. A failure carries the API family, the
//! source location of the failing call and the API's own error string, and renders as
//! `<api> failure <file>:<line>: '<error string>'`.

use std::error::Error;
use std::fmt;
use std::panic::Location;

/// The device API a failure originated from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Api {
    #[cfg_attr(not(feature = "cuda"), allow(dead_code))]
    Cuda,
    #[cfg_attr(not(feature = "rocm"), allow(dead_code))]
    Hip,
    #[cfg_attr(not(feature = "rocm"), allow(dead_code))]
    Hiprtc,
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Api::Cuda => "CUDA",
            Api::Hip => "HIP",
            Api::Hiprtc => "HIPRTC",
        })
    }
}

#[derive(Clone, Debug)]
pub struct DeviceFailure {
    api: Api,
    location: &'static Location<'static>,
    message: String,
}

impl DeviceFailure {
    /// A failure reported at the caller's location.
    #[track_caller]
    pub fn new(api: Api, message: impl Into<String>) -> Self {
        Self::at(api, message, Location::caller())
    }

    pub fn at(api: Api, message: impl Into<String>, location: &'static Location<'static>) -> Self {
        Self {
            api,
            location,
            message: message.into(),
        }
    }

    pub fn api(&self) -> Api {
        self.api
    }
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure {}:{}: '{}'",
            self.api,
            self.location.file(),
            self.location.line(),
            self.message
        )
    }
}

impl Error for DeviceFailure {}

/// Converts a device API result into a [`DeviceFailure`] located at the calling line.
pub trait Check<T> {
    #[track_caller]
    fn check(self) -> Result<T, DeviceFailure>;
}

// cust renders driver error strings with Debug quoting
#[cfg(feature = "cuda")]
fn cuda_message(error: cust::error::CudaError) -> String {
    error.to_string().trim_matches('"').to_owned()
}

#[cfg(feature = "cuda")]
impl<T> Check<T> for cust::error::CudaResult<T> {
    #[track_caller]
    fn check(self) -> Result<T, DeviceFailure> {
        let location = Location::caller();
        self.map_err(|e| DeviceFailure::at(Api::Cuda, cuda_message(e), location))
    }
}

// explicit frees hand the resource back alongside the error
#[cfg(feature = "cuda")]
impl<U> Check<()> for cust::error::DropResult<U> {
    #[track_caller]
    fn check(self) -> Result<(), DeviceFailure> {
        let location = Location::caller();
        self.map_err(|(e, _)| DeviceFailure::at(Api::Cuda, cuda_message(e), location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_api_location_and_message() {
        let failure = DeviceFailure::new(Api::Hip, "out of memory");
        let line = line!() - 1;
        assert_eq!(
            failure.to_string(),
            format!("HIP failure {}:{line}: 'out of memory'", file!())
        );
        assert_eq!(failure.api(), Api::Hip);
    }

    #[cfg(feature = "cuda")]
    #[test]
    fn cuda_errors_point_at_the_checked_call() {
        let result: cust::error::CudaResult<()> =
            Err(cust::error::CudaError::InvalidMemoryAllocation);
        let failure = result.check().unwrap_err();
        let line = line!() - 1;
        assert_eq!(
            failure.to_string(),
            format!("CUDA failure {}:{line}: 'Invalid memory allocation'", file!())
        );
    }
}
