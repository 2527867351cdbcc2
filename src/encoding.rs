//! Multi-coil non-Cartesian SENSE encoding operator.
//!
//! `E x = { F_nu (csm_c * x) }_c` maps one image to the k-space samples of every channel, and the
//! adjoint applies the density compensation before gridding back and combining the channels
//! with the conjugate coil maps. All buffers are allocated once at setup.

use crate::device::{Device, DeviceArray};
use crate::error::{ReconError, Result};
use crate::gridding::GriddingPlan;
use crate::params::EncodingState;
use crate::solver::LinearOperator;
use ndarray::Array3;
use num_complex::Complex32;
use rayon::prelude::*;
use tracing::debug;

pub struct EncodingOperator {
    plan: GriddingPlan,
    channels: usize,
    samples_per_frame: usize,
    preprocessed: bool,
    /// channel-major coil maps
    csm: DeviceArray<Complex32>,
    dcw: DeviceArray<f32>,
    grids: DeviceArray<Complex32>,
    work: DeviceArray<Complex32>,
    coil_images: DeviceArray<Complex32>,
    coil_samples: DeviceArray<Complex32>,
}

impl EncodingOperator {
    /// Sets up the gridding plan and allocates all per-channel buffers. Coil maps start out as
    /// unit sensitivity and the density compensation as uniform.
    pub fn setup(device: &Device, state: &EncodingState, samples_per_frame: usize) -> Result<Self> {
        if state.channels == 0 || samples_per_frame == 0 {
            return Err(ReconError::Configuration(format!(
                "encoding needs channels and samples, got {} channels and {samples_per_frame} samples",
                state.channels
            )));
        }
        let plan = GriddingPlan::setup(state.matrix_size, state.matrix_size_os, state.kernel_width)?;
        let channels = state.channels;
        let image_len = plan.image_len();
        let grid_len = plan.grid_len();

        let mut csm = device.alloc_zeroed(channels * image_len)?;
        csm.fill(Complex32::ONE);
        let mut dcw = device.alloc_zeroed(samples_per_frame)?;
        dcw.fill(1.);
        let op = Self {
            plan,
            channels,
            samples_per_frame,
            preprocessed: false,
            csm,
            dcw,
            grids: device.alloc_zeroed(channels * grid_len)?,
            work: device.alloc_zeroed(channels * grid_len)?,
            coil_images: device.alloc_zeroed(channels * image_len)?,
            coil_samples: device.alloc_zeroed(channels * samples_per_frame)?,
        };
        debug!(
            matrix = ?state.matrix_size,
            grid = ?state.matrix_size_os,
            channels,
            samples_per_frame,
            "encoding operator ready"
        );
        Ok(op)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn image_len(&self) -> usize {
        self.plan.image_len()
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    /// channel-major coil maps currently in use
    pub fn csm(&self) -> &[Complex32] {
        self.csm.as_slice()
    }

    /// Replaces the coil maps. `csm` has shape `(channels, m0, m1)`.
    pub fn set_csm(&mut self, csm: &Array3<Complex32>) -> Result<()> {
        let [m0, m1] = self.plan.matrix_size();
        if csm.dim() != (self.channels, m0, m1) {
            return Err(ReconError::Configuration(format!(
                "coil maps of shape {:?} do not match ({}, {m0}, {m1})",
                csm.dim(),
                self.channels
            )));
        }
        match csm.as_slice() {
            Some(s) => self.csm.copy_from_host(s),
            None => {
                let s: Vec<Complex32> = csm.iter().copied().collect();
                self.csm.copy_from_host(&s)
            }
        }
    }

    pub fn set_dcw(&mut self, dcw: &[f32]) -> Result<()> {
        if dcw.len() != self.samples_per_frame {
            return Err(ReconError::Data(format!(
                "density compensation has {} weights, expected {}",
                dcw.len(),
                self.samples_per_frame
            )));
        }
        self.dcw.copy_from_host(dcw)
    }

    /// Prepares the gridding lookup for the current frame's trajectory.
    pub fn preprocess(&mut self, trajectory: &DeviceArray<[f32; 2]>) -> Result<()> {
        if trajectory.len() != self.samples_per_frame {
            return Err(ReconError::Data(format!(
                "trajectory has {} points, expected {}",
                trajectory.len(),
                self.samples_per_frame
            )));
        }
        self.plan.preprocess(trajectory)?;
        self.preprocessed = true;
        Ok(())
    }

    fn check_ready(&self, image: &[Complex32]) -> Result<()> {
        if !self.preprocessed {
            return Err(ReconError::Data("encoding operator used before preprocess".to_string()));
        }
        if image.len() != self.image_len() {
            return Err(ReconError::Data(format!(
                "image has {} values, expected {}",
                image.len(),
                self.image_len()
            )));
        }
        Ok(())
    }

    /// image -> coil_samples
    fn forward_coils(&mut self, image: &[Complex32]) {
        let image_len = self.plan.image_len();
        let grid_len = self.plan.grid_len();
        let plan = &self.plan;
        self.coil_images
            .as_mut_slice()
            .par_chunks_exact_mut(image_len)
            .zip(self.csm.as_slice().par_chunks_exact(image_len))
            .zip(self.grids.as_mut_slice().par_chunks_exact_mut(grid_len))
            .zip(self.work.as_mut_slice().par_chunks_exact_mut(grid_len))
            .zip(self.coil_samples.as_mut_slice().par_chunks_exact_mut(self.samples_per_frame))
            .for_each(|((((coil_img, csm), grid), work), samples)| {
                coil_img.iter_mut().zip(csm).zip(image).for_each(|((c, s), x)| *c = s * x);
                plan.forward(coil_img, grid, work, samples);
            });
    }

    /// dcw * coil_samples -> sum_c conj(csm_c) * coil image, written to `out`
    fn weighted_adjoint(&mut self, out: &mut [Complex32]) {
        let image_len = self.plan.image_len();
        let grid_len = self.plan.grid_len();
        let plan = &self.plan;
        let dcw = self.dcw.as_slice();
        self.coil_samples
            .as_mut_slice()
            .par_chunks_exact_mut(self.samples_per_frame)
            .zip(self.grids.as_mut_slice().par_chunks_exact_mut(grid_len))
            .zip(self.work.as_mut_slice().par_chunks_exact_mut(grid_len))
            .zip(self.coil_images.as_mut_slice().par_chunks_exact_mut(image_len))
            .for_each(|(((samples, grid), work), coil_img)| {
                samples.iter_mut().zip(dcw).for_each(|(s, w)| *s *= w);
                plan.adjoint(samples, grid, work, coil_img);
            });

        let channels = self.channels;
        let csm = self.csm.as_slice();
        let coil_images = self.coil_images.as_slice();
        out.par_iter_mut().enumerate().for_each(|(i, o)| {
            *o = (0..channels).map(|c| csm[c * image_len + i].conj() * coil_images[c * image_len + i]).sum();
        });
    }

    /// E x, `samples` is channel-major with `channels * samples_per_frame` values
    pub fn mult_m(&mut self, image: &[Complex32], samples: &mut [Complex32]) -> Result<()> {
        self.check_ready(image)?;
        if samples.len() != self.coil_samples.len() {
            return Err(ReconError::Data(format!(
                "sample buffer has {} values, expected {}",
                samples.len(),
                self.coil_samples.len()
            )));
        }
        self.forward_coils(image);
        samples.copy_from_slice(self.coil_samples.as_slice());
        Ok(())
    }

    /// E^H W y
    pub fn mult_mh(&mut self, samples: &[Complex32], image: &mut [Complex32]) -> Result<()> {
        self.check_ready(image)?;
        self.coil_samples.copy_from_host(samples)?;
        self.weighted_adjoint(image);
        Ok(())
    }

    /// E^H W E x
    pub fn mult_mh_m(&mut self, image: &[Complex32], out: &mut [Complex32]) -> Result<()> {
        self.check_ready(image)?;
        self.check_ready(out)?;
        self.forward_coils(image);
        self.weighted_adjoint(out);
        Ok(())
    }
}

impl LinearOperator for EncodingOperator {
    fn domain_len(&self) -> usize {
        self.image_len()
    }

    fn mult_mh_m(&mut self, x: &[Complex32], out: &mut [Complex32]) -> Result<()> {
        EncodingOperator::mult_mh_m(self, x, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{Cartesian, GoldenAngleRadial, TrajectoryStrategy};
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn state(m: usize, os: usize, channels: usize, samples_per_profile: usize) -> EncodingState {
        EncodingState {
            matrix_size: [m, m],
            matrix_size_os: [os, os],
            kernel_width: 5.5,
            channels,
            samples_per_profile,
        }
    }

    fn random_data(n: usize, rng: &mut StdRng) -> Vec<Complex32> {
        (0..n).map(|_| Complex32::new(rng.random::<f32>() - 0.5, rng.random::<f32>() - 0.5)).collect()
    }

    fn dot(a: &[Complex32], b: &[Complex32]) -> Complex32 {
        a.iter().zip(b).map(|(a, b)| a.conj() * b).sum()
    }

    #[test]
    fn unit_coils_on_full_cartesian_sampling() {
        let device = Device::select(0).unwrap();
        let m = 32;
        let mut op = EncodingOperator::setup(&device, &state(m, 64, 1, m), m * m).unwrap();
        let mut traj = Vec::new();
        Cartesian.compute(0, m, m, &mut traj).unwrap();
        op.preprocess(&device.upload(&traj).unwrap()).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let x = random_data(m * m, &mut rng);
        let mut out = vec![Complex32::ZERO; m * m];
        op.mult_mh_m(&x, &mut out).unwrap();
        // every other point of a two-fold oversampled grid
        for (a, b) in x.iter().zip(&out) {
            assert_abs_diff_eq!((a * 0.25 - b).norm(), 0., epsilon = 1e-3);
        }
    }

    #[test]
    fn adjoint_with_coils_and_weights() {
        let device = Device::select(0).unwrap();
        let (m, channels, ppf, sp) = (24, 3, 12, 48);
        let mut op = EncodingOperator::setup(&device, &state(m, 32, channels, sp), ppf * sp).unwrap();
        let mut rng = StdRng::seed_from_u64(11);

        let csm = Array3::from_shape_vec((channels, m, m), random_data(channels * m * m, &mut rng)).unwrap();
        op.set_csm(&csm).unwrap();
        let dcw: Vec<f32> = (0..ppf * sp).map(|_| rng.random::<f32>() + 0.1).collect();
        op.set_dcw(&dcw).unwrap();
        let mut traj = Vec::new();
        GoldenAngleRadial.compute(7, ppf, sp, &mut traj).unwrap();
        op.preprocess(&device.upload(&traj).unwrap()).unwrap();

        let x = random_data(m * m, &mut rng);
        let y = random_data(channels * ppf * sp, &mut rng);
        let mut ex = vec![Complex32::ZERO; y.len()];
        op.mult_m(&x, &mut ex).unwrap();
        let mut ehy = vec![Complex32::ZERO; x.len()];
        op.mult_mh(&y, &mut ehy).unwrap();

        // <E x, W y> == <x, E^H W y>
        let wy: Vec<Complex32> =
            y.iter().enumerate().map(|(i, y)| y * dcw[i % (ppf * sp)]).collect();
        let lhs = dot(&ex, &wy);
        let rhs = dot(&x, &ehy);
        assert_abs_diff_eq!((lhs - rhs).norm() / lhs.norm(), 0., epsilon = 1e-3);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let device = Device::select(0).unwrap();
        let mut op = EncodingOperator::setup(&device, &state(16, 32, 2, 16), 16 * 4).unwrap();
        let x = vec![Complex32::ZERO; 16 * 16];
        let mut out = x.clone();
        assert!(matches!(op.mult_mh_m(&x, &mut out), Err(ReconError::Data(_))));

        let bad_csm = Array3::<Complex32>::zeros((3, 16, 16));
        assert!(matches!(op.set_csm(&bad_csm), Err(ReconError::Configuration(_))));
        assert!(op.set_dcw(&[1.; 10]).is_err());
        let short = device.upload(&[[0f32; 2]; 10]).unwrap();
        assert!(matches!(op.preprocess(&short), Err(ReconError::Data(_))));
    }
}
