//! Command-line interface. Everything the core receives has been range-checked here.

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use unit_locator::{ArchFamily, BUFFER_LEN, GROUP_SIZE, ProbeTarget};

const DEFAULT_GFX_TARGET: &str = "gfx90a";

#[derive(Parser, Debug)]
#[command(
    name = "cu-latency",
    version,
    about = "Prints the cycle latency of a global memory read-modify-write executed on one chosen compute unit",
    after_help = "Set CU_LATENCY_LOG (e.g. CU_LATENCY_LOG=debug) for diagnostics on stderr."
)]
pub struct Cli {
    /// Start-index unit; the element offset into the target buffer is this value times 64.
    #[arg(value_parser = parse_start_unit)]
    pub start_unit: u32,

    /// Identity of the compute unit that performs the measurement.
    pub target_unit: u32,

    /// Device API to run on.
    #[arg(long, value_enum, default_value_t = Backend::default())]
    pub backend: Backend,

    /// gfx target the HIP kernel is compiled for, e.g. gfx90a, gfx942 or gfx1100 (rocm only;
    /// defaults to gfx90a).
    #[arg(long)]
    pub arch: Option<String>,

    /// Compile the HIP kernel in CU mode instead of WGP mode (gfx10xx and gfx11xx only).
    #[arg(long)]
    pub cu_mode: bool,

    /// Ordinal of the device to run on.
    #[arg(long, default_value_t = 0)]
    pub device: u32,

    /// Exit with status 0 even when a device call fails.
    #[arg(long)]
    pub exit_zero_on_failure: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Backend {
    /// NVIDIA GPUs through the CUDA driver API.
    Cuda,
    /// AMD GPUs through HIP, with the kernel compiled at run time by hiprtc.
    Rocm,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "cuda") {
            Backend::Cuda
        } else {
            Backend::Rocm
        }
    }
}

/// Validated parameters of one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunConfig {
    pub backend: BackendConfig,
    pub device: u32,
    pub target: ProbeTarget,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendConfig {
    Cuda,
    Rocm { gfx_target: String, family: ArchFamily },
}

impl BackendConfig {
    /// Layout family the kernel decodes unit identities with.
    pub fn family(&self) -> ArchFamily {
        match self {
            BackendConfig::Cuda => ArchFamily::Nvptx,
            BackendConfig::Rocm { family, .. } => *family,
        }
    }
}

impl Cli {
    /// Resolves the arguments into a [`RunConfig`], rejecting combinations clap cannot check
    /// on a single argument.
    pub fn config(&self) -> Result<RunConfig, clap::Error> {
        let backend = match self.backend {
            Backend::Cuda => {
                if self.cu_mode {
                    return Err(invalid("--cu-mode only applies to the rocm backend"));
                }
                if self.arch.is_some() {
                    return Err(invalid("--arch only applies to the rocm backend"));
                }
                BackendConfig::Cuda
            }
            Backend::Rocm => {
                let arch = self.arch.as_deref().unwrap_or(DEFAULT_GFX_TARGET);
                let family = ArchFamily::from_gfx_target(arch, self.cu_mode)
                    .map_err(|e| invalid(format!("invalid --arch '{arch}': {e}")))?;
                BackendConfig::Rocm {
                    gfx_target: arch.to_owned(),
                    family,
                }
            }
        };
        // parse_start_unit already bounded the scaled index
        let target = ProbeTarget::from_start_unit(self.start_unit, self.target_unit)
            .ok_or_else(|| invalid("start index out of range"))?;
        Ok(RunConfig {
            backend,
            device: self.device,
            target,
        })
    }
}

fn invalid(message: impl std::fmt::Display) -> clap::Error {
    Cli::command().error(ErrorKind::ValueValidation, message)
}

fn parse_start_unit(s: &str) -> Result<u32, String> {
    let unit: u32 = s.parse().map_err(|e| format!("'{s}' is not a start unit: {e}"))?;
    match ProbeTarget::from_start_unit(unit, 0) {
        Some(_) => Ok(unit),
        None => Err(format!(
            "start unit {unit} places the start index past the {BUFFER_LEN}-element buffer (largest start unit is {})",
            (BUFFER_LEN as u32 - 1) / GROUP_SIZE
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("cu-latency").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn two_positionals_select_start_index_and_target() {
        let config = parse(&["3", "17"]).unwrap().config().unwrap();
        assert_eq!(config.target, ProbeTarget::new(192, 17));
        assert_eq!(config.device, 0);
    }

    #[test]
    fn start_unit_bounds() {
        let last = ((BUFFER_LEN as u32 - 1) / GROUP_SIZE).to_string();
        assert!(parse(&[&last, "0"]).is_ok());
        let past = ((BUFFER_LEN as u32) / GROUP_SIZE).to_string();
        let err = parse(&[&past, "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(parse(&["0"]).is_err());
        assert!(parse(&["x", "0"]).is_err());
        assert!(parse(&["0", "-1"]).is_err());
    }

    #[test]
    fn rocm_resolves_the_gfx_family() {
        let cli = parse(&["0", "5", "--backend", "rocm", "--arch", "gfx1100", "--cu-mode"]).unwrap();
        let config = cli.config().unwrap();
        assert_eq!(config.backend.family(), ArchFamily::Gfx11 { cu_mode: true });
    }

    #[test]
    fn inconsistent_flags_are_rejected() {
        let cli = parse(&["0", "5", "--backend", "rocm", "--arch", "gfx90a", "--cu-mode"]).unwrap();
        assert_eq!(cli.config().unwrap_err().kind(), ErrorKind::ValueValidation);
        let cli = parse(&["0", "5", "--backend", "rocm", "--arch", "sm_80"]).unwrap();
        assert!(cli.config().is_err());
        let cli = parse(&["0", "5", "--backend", "cuda", "--cu-mode"]).unwrap();
        assert!(cli.config().is_err());
    }

    #[test]
    fn arch_is_rejected_on_cuda_and_defaults_on_rocm() {
        let cli = parse(&["0", "5", "--backend", "cuda", "--arch", "gfx1100"]).unwrap();
        assert_eq!(cli.config().unwrap_err().kind(), ErrorKind::ValueValidation);

        let config = parse(&["0", "5", "--backend", "rocm"]).unwrap().config().unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Rocm {
                gfx_target: "gfx90a".to_owned(),
                family: ArchFamily::Cdna,
            }
        );
    }

    #[test]
    fn cuda_backend_uses_smid_layout() {
        let cli = parse(&["0", "0", "--backend", "cuda"]).unwrap();
        assert_eq!(cli.config().unwrap().backend, BackendConfig::Cuda);
        assert_eq!(BackendConfig::Cuda.family(), ArchFamily::Nvptx);
    }
}
