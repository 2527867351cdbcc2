//! Diagonal preconditioning from the coil sensitivities.

use crate::device::{Device, DeviceArray};
use crate::error::{ReconError, Result};
use crate::regularization::RegularizationTerm;
use num_complex::Complex32;
use rayon::prelude::*;
use tracing::debug;

/// Per-voxel weights `w = 1 / sqrt(sum_c |csm_c|^2 + kappa * diag(R^H R))`.
///
/// Applied to a residual as `z = w^2 r`, i.e. the weights act once from each side of the normal
/// operator. Voxels without any coil sensitivity get weight zero so they never enter the solve.
pub struct PrecondWeights {
    weights: DeviceArray<f32>,
}

impl PrecondWeights {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f32] {
        self.weights.as_slice()
    }

    /// z = w^2 r
    pub fn apply(&self, r: &[Complex32], z: &mut [Complex32]) {
        z.par_iter_mut()
            .zip(r.par_iter())
            .zip(self.weights.as_slice().par_iter())
            .for_each(|((z, r), w)| *z = r * (w * w));
    }
}

pub struct Preconditioner {
    device: Device,
    diag: Vec<f32>,
}

impl Preconditioner {
    pub fn new(device: Device) -> Self {
        Self { device, diag: Vec::new() }
    }

    /// Computes weights for channel-major coil maps `csm` holding `channels` images. Storage of
    /// `recycle` is reused when it has the right length.
    pub fn update(
        &mut self,
        csm: &[Complex32],
        channels: usize,
        regularization: Option<&dyn RegularizationTerm>,
        recycle: Option<PrecondWeights>,
    ) -> Result<PrecondWeights> {
        if channels == 0 || csm.len() % channels != 0 {
            return Err(ReconError::Data(format!(
                "{} coil map values do not split into {channels} channels",
                csm.len()
            )));
        }
        let n = csm.len() / channels;

        let mut weights = match recycle {
            Some(w) if w.len() == n => w.weights,
            _ => self.device.alloc_zeroed(n)?,
        };

        self.diag.clear();
        self.diag.resize(n, 0.);
        let kappa = match regularization {
            Some(reg) => {
                reg.diagonal(&mut self.diag);
                reg.weight()
            }
            None => 0.,
        };

        let diag = &self.diag;
        weights.as_mut_slice().par_iter_mut().enumerate().for_each(|(i, w)| {
            let ss: f32 = (0..channels).map(|c| csm[c * n + i].norm_sqr()).sum::<f32>() + kappa * diag[i];
            *w = if ss > f32::MIN_POSITIVE { ss.sqrt().recip() } else { 0. };
        });

        let masked = weights.as_slice().iter().filter(|&&w| w == 0.).count();
        if masked > 0 {
            debug!(masked, "voxels without coil sensitivity excluded from preconditioning");
        }
        Ok(PrecondWeights { weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regularization::Tikhonov;
    use approx::assert_abs_diff_eq;

    #[test]
    fn weights_follow_sum_of_squares() {
        let device = Device::select(0).unwrap();
        let mut p = Preconditioner::new(device);
        // two channels, two voxels
        let csm = [Complex32::new(3., 0.), Complex32::new(0., 1.), Complex32::new(0., 4.), Complex32::new(0., 0.)];
        let w = p.update(&csm, 2, None, None).unwrap();
        assert_abs_diff_eq!(w.weights()[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(w.weights()[1], 1., epsilon = 1e-6);
    }

    #[test]
    fn zero_sensitivity_gives_zero_weight() {
        let device = Device::select(0).unwrap();
        let mut p = Preconditioner::new(device);
        let csm = vec![Complex32::ZERO; 8];
        let w = p.update(&csm, 2, None, None).unwrap();
        assert!(w.weights().iter().all(|w| *w == 0. && w.is_finite()));

        let r = vec![Complex32::new(1., 1.); 4];
        let mut z = vec![Complex32::new(f32::NAN, 0.); 4];
        w.apply(&r, &mut z);
        assert!(z.iter().all(|z| *z == Complex32::ZERO));
    }

    #[test]
    fn regularization_diagonal_is_added() {
        let device = Device::select(0).unwrap();
        let mut p = Preconditioner::new(device);
        let csm = vec![Complex32::ZERO; 4];
        let reg = Tikhonov::new(4, 0.25);
        let w = p.update(&csm, 1, Some(&reg), None).unwrap();
        w.weights().iter().for_each(|w| assert_abs_diff_eq!(*w, 2., epsilon = 1e-6));
    }

    #[test]
    fn recycled_storage_is_reused() {
        let device = Device::with_memory_limit(0, 64).unwrap();
        let mut p = Preconditioner::new(device.clone());
        let csm = vec![Complex32::ONE; 16];
        let w = p.update(&csm, 1, None, None).unwrap();
        assert_eq!(device.memory_info().0, 0);
        // a fresh allocation would exceed the budget
        let w = p.update(&csm, 1, None, Some(w)).unwrap();
        assert_eq!(w.len(), 16);
    }
}
