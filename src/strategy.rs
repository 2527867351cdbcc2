// Per-frame hooks that are wired into the reconstruction sequence but do nothing by default

use crate::error::Result;
use ndarray::Array3;
use num_complex::Complex32;

/// What a per-frame hook gets to see of the staged frame.
pub struct FrameContext<'a> {
    pub frame_number: usize,
    pub channels: usize,
    /// channel-major samples, `channels * trajectory.len()` values
    pub samples: &'a [Complex32],
    pub trajectory: &'a [[f32; 2]],
    pub dcw: &'a [f32],
}

/// Coil sensitivity estimation from the incoming data.
pub trait CsmUpdate: Send {
    /// Returns new coil maps of shape `(channels, m0, m1)` once an estimate is available.
    fn update(&mut self, frame: &FrameContext<'_>) -> Result<Option<Array3<Complex32>>>;
}

/// keeps whatever coil maps were supplied externally
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepCsm;

impl CsmUpdate for KeepCsm {
    fn update(&mut self, _frame: &FrameContext<'_>) -> Result<Option<Array3<Complex32>>> {
        Ok(None)
    }
}

/// Channel noise decorrelation applied to staged samples before the solve.
pub trait NoiseDecorrelation: Send {
    fn decorrelate(&mut self, samples: &mut [Complex32], channels: usize, trajectory: &[[f32; 2]]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecorrelation;

impl NoiseDecorrelation for NoDecorrelation {
    fn decorrelate(&mut self, _samples: &mut [Complex32], _channels: usize, _trajectory: &[[f32; 2]]) -> Result<()> {
        Ok(())
    }
}
