// Host-side staging of a frame and its upload to the device

use crate::device::{Device, DeviceArray};
use crate::error::{ReconError, Result};
use crate::message::AcquisitionProfile;
use num_complex::Complex32;
use tracing::debug;

/// Copies the profiles of one frame into a channel-major host buffer and uploads it.
///
/// The host and device buffers are only reallocated when the number of samples per channel
/// changes, so steady-state streaming does not allocate.
pub struct SampleStager {
    device: Device,
    channels: usize,
    samples_per_profile: usize,
    allocated_samples: usize,
    host: Vec<Complex32>,
    samples: Option<DeviceArray<Complex32>>,
    trajectory: Option<DeviceArray<[f32; 2]>>,
}

impl SampleStager {
    pub fn new(device: Device, channels: usize, samples_per_profile: usize) -> Self {
        Self {
            device,
            channels,
            samples_per_profile,
            allocated_samples: 0,
            host: Vec::new(),
            samples: None,
            trajectory: None,
        }
    }

    /// samples per channel the buffers currently hold
    pub fn allocated_samples(&self) -> usize {
        self.allocated_samples
    }

    fn ensure_capacity(&mut self, samples_needed: usize) -> Result<()> {
        if samples_needed == self.allocated_samples && self.samples.is_some() {
            return Ok(());
        }
        let total = samples_needed * self.channels;
        // drop the old buffers first so they do not count against the new allocation
        self.samples = None;
        self.host = Vec::new();
        self.allocated_samples = 0;

        self.host
            .try_reserve_exact(total)
            .map_err(|e| ReconError::Resource(format!("host staging buffer of {total} samples: {e}")))?;
        self.host.resize(total, Complex32::ZERO);
        self.samples = Some(self.device.alloc_zeroed(total)?);
        self.allocated_samples = samples_needed;
        debug!(samples_needed, channels = self.channels, "staging buffers allocated");
        Ok(())
    }

    /// Stages the profiles of a frame, oldest first, and returns the device copy.
    /// Layout: `host[c * allocated_samples + p * samples_per_profile + s]`.
    pub fn stage(&mut self, frame: &[&AcquisitionProfile]) -> Result<&mut DeviceArray<Complex32>> {
        let sp = self.samples_per_profile;
        for (p, profile) in frame.iter().enumerate() {
            if profile.channels() != self.channels || profile.samples() != sp {
                return Err(ReconError::Data(format!(
                    "profile {p} has {} channels x {} samples, expected {} x {sp}",
                    profile.channels(),
                    profile.samples(),
                    self.channels
                )));
            }
        }
        self.ensure_capacity(frame.len() * sp)?;

        let n = self.allocated_samples;
        for c in 0..self.channels {
            let dst = &mut self.host[c * n..(c + 1) * n];
            for (profile, chunk) in frame.iter().zip(dst.chunks_exact_mut(sp)) {
                chunk.copy_from_slice(profile.channel(c));
            }
        }
        let samples = self.samples.as_mut().ok_or_else(|| ReconError::Resource("staging buffer missing".to_string()))?;
        samples.copy_from_host(&self.host)?;
        Ok(samples)
    }

    /// Uploads a trajectory, reusing the device buffer when the length is unchanged.
    pub fn stage_trajectory(&mut self, trajectory: &[[f32; 2]]) -> Result<&DeviceArray<[f32; 2]>> {
        if self.trajectory.as_ref().map(|t| t.len()) != Some(trajectory.len()) {
            self.trajectory = None;
            self.trajectory = Some(self.device.alloc_zeroed(trajectory.len())?);
        }
        let dev = self.trajectory.as_mut().ok_or_else(|| ReconError::Resource("trajectory buffer missing".to_string()))?;
        dev.copy_from_host(trajectory)?;
        Ok(dev)
    }

    /// device copy of the last staged frame
    pub fn samples(&self) -> Option<&DeviceArray<Complex32>> {
        self.samples.as_ref()
    }
}
