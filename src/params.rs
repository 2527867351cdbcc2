use crate::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// oversampled grid dimensions are rounded up to a multiple of the device execution width
pub const WARP_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    Silent,
    Verbose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegularizationKind {
    None,
    Tikhonov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajectoryKind {
    GoldenAngleRadial,
    FixedAngleRadial,
    Cartesian,
}

/// Parameters of one reconstruction node. One node reconstructs exactly one slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconParams {
    /// the slice this node owns
    pub slice_no: u16,
    /// forward profiles of other slices down the chain instead of dropping them
    pub pass_on_undesired_data: bool,
    pub profiles_per_frame: usize,
    /// number of profiles re-used by the next frame
    pub shared_profiles: usize,
    pub device_number: usize,
    pub number_of_iterations: usize,
    /// relative residual at which the solver stops early
    pub cg_limit: f32,
    pub oversampling: f32,
    pub kernel_width: f32,
    /// regularization weight, only used when `regularization` is enabled
    pub kappa: f32,
    pub regularization: RegularizationKind,
    pub output_mode: OutputMode,
    pub trajectory: TrajectoryKind,
    /// number of frames accumulated by a coil map update strategy
    pub csm_buffer_length: usize,
}

impl Default for ReconParams {
    fn default() -> Self {
        Self {
            slice_no: 0,
            pass_on_undesired_data: true,
            profiles_per_frame: 48,
            shared_profiles: 16,
            device_number: 0,
            number_of_iterations: 5,
            cg_limit: 1e-6,
            oversampling: 1.25,
            kernel_width: 5.5,
            kappa: 0.1,
            regularization: RegularizationKind::None,
            output_mode: OutputMode::Verbose,
            trajectory: TrajectoryKind::GoldenAngleRadial,
            csm_buffer_length: 8,
        }
    }
}

impl ReconParams {
    pub fn validate(&self) -> Result<()> {
        if self.profiles_per_frame == 0 {
            return Err(ReconError::Configuration("profiles_per_frame must be non-zero".to_string()));
        }
        if self.shared_profiles >= self.profiles_per_frame {
            return Err(ReconError::Configuration(format!(
                "shared_profiles ({}) must be less than profiles_per_frame ({})",
                self.shared_profiles, self.profiles_per_frame
            )));
        }
        if !(self.oversampling >= 1.) {
            return Err(ReconError::Configuration(format!("oversampling must be at least 1, got {}", self.oversampling)));
        }
        if !(self.kernel_width > 0.) {
            return Err(ReconError::Configuration(format!("kernel width must be positive, got {}", self.kernel_width)));
        }
        if self.number_of_iterations == 0 {
            return Err(ReconError::Configuration("number_of_iterations must be non-zero".to_string()));
        }
        if !(self.cg_limit >= 0.) {
            return Err(ReconError::Configuration(format!("cg_limit must be non-negative, got {}", self.cg_limit)));
        }
        Ok(())
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let toml_str = read_to_string(path.as_ref())?;
        let params: ReconParams = toml::from_str(&toml_str)
            .map_err(|e| ReconError::Configuration(format!("failed to parse {}: {e}", path.as_ref().display())))?;
        params.validate()?;
        Ok(params)
    }
}

/// The encoding section of the scan configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParams {
    /// samples per profile
    pub readout_length: usize,
    pub channels: usize,
    pub matrix_size: [usize; 2],
}

#[derive(Deserialize)]
struct ScanDocument {
    encoding: ScanParams,
}

impl ScanParams {
    pub fn validate(&self) -> Result<()> {
        if self.readout_length == 0 || self.channels == 0 || self.matrix_size.contains(&0) {
            return Err(ReconError::Configuration(format!("incomplete encoding parameters: {:?}", self)));
        }
        Ok(())
    }

    /// reads the `[encoding]` table of a scan description
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let toml_str = read_to_string(path.as_ref())?;
        let doc: ScanDocument = toml::from_str(&toml_str)
            .map_err(|e| ReconError::Configuration(format!("failed to parse {}: {e}", path.as_ref().display())))?;
        doc.encoding.validate()?;
        Ok(doc.encoding)
    }
}

/// Encoding geometry derived once at configuration, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodingState {
    pub matrix_size: [usize; 2],
    pub matrix_size_os: [usize; 2],
    pub kernel_width: f32,
    pub channels: usize,
    pub samples_per_profile: usize,
}

impl EncodingState {
    pub fn derive(scan: &ScanParams, params: &ReconParams) -> Result<Self> {
        scan.validate()?;
        params.validate()?;
        // image headers carry the matrix size as u16
        if scan.matrix_size.iter().any(|&m| u16::try_from(m).is_err()) {
            return Err(ReconError::Configuration(format!(
                "matrix size {:?} exceeds the image header range of {}",
                scan.matrix_size,
                u16::MAX
            )));
        }
        let mut matrix_size_os = [0; 2];
        matrix_size_os.iter_mut().zip(scan.matrix_size).for_each(|(os, m)| {
            *os = oversampled_dim(m, params.oversampling);
        });
        Ok(Self {
            matrix_size: scan.matrix_size,
            matrix_size_os,
            kernel_width: params.kernel_width,
            channels: scan.channels,
            samples_per_profile: scan.readout_length,
        })
    }

    pub fn image_len(&self) -> usize {
        self.matrix_size.iter().product()
    }

    pub fn grid_len(&self) -> usize {
        self.matrix_size_os.iter().product()
    }
}

/// ceil(n * oversampling / WARP_SIZE) * WARP_SIZE
pub fn oversampled_dim(n: usize, oversampling: f32) -> usize {
    ((n as f32 * oversampling) / WARP_SIZE as f32).ceil() as usize * WARP_SIZE
}

fn read_to_string(path: &Path) -> Result<String> {
    let mut s = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut s))
        .map_err(|e| ReconError::Configuration(format!("failed to read {}: {e}", path.display())))?;
    Ok(s)
}
