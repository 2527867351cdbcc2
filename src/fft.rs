// Centered, unitary 2-D FFT on row-major complex data

use num_complex::Complex32;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

impl From<FftDirection> for rustfft::FftDirection {
    fn from(direction: FftDirection) -> Self {
        match direction {
            FftDirection::Forward => rustfft::FftDirection::Forward,
            FftDirection::Inverse => rustfft::FftDirection::Inverse,
        }
    }
}

#[inline]
/// returns the phase shift associated with the centered fft
fn phase_shift(index: usize, n: usize) -> f32 {
    PI * (index as f32 - (n as f32 / 2.))
}

/// per-axis phase ramps e^{i pi (i - n/2)} used to center the transform
fn phase_ramp(n: usize) -> Vec<Complex32> {
    (0..n).map(|i| Complex32::from_polar(1., phase_shift(i, n))).collect()
}

/// Cached plans for one 2-D grid. The plan is immutable after creation and can be shared by
/// threads transforming different channels.
pub struct Fft2Plan {
    dims: [usize; 2],
    forward: [Arc<dyn Fft<f32>>; 2],
    inverse: [Arc<dyn Fft<f32>>; 2],
    ramps: [Vec<Complex32>; 2],
    scale: f32,
}

impl Fft2Plan {
    pub fn new(dims: [usize; 2]) -> Self {
        let mut planner = FftPlanner::new();
        let [n0, n1] = dims;
        Self {
            dims,
            // index 0 transforms rows (length n1), index 1 transforms columns (length n0)
            forward: [planner.plan_fft_forward(n1), planner.plan_fft_forward(n0)],
            inverse: [planner.plan_fft_inverse(n1), planner.plan_fft_inverse(n0)],
            ramps: [phase_ramp(n0), phase_ramp(n1)],
            scale: 1. / ((n0 * n1) as f32).sqrt(),
        }
    }

    pub fn dims(&self) -> [usize; 2] {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unitary centered transform of `data` in place. `work` is scratch space of the same size.
    pub fn fft2c(&self, data: &mut [Complex32], work: &mut [Complex32], direction: FftDirection) {
        assert_eq!(data.len(), self.len(), "data length does not match fft plan");
        assert_eq!(work.len(), self.len(), "work length does not match fft plan");
        let [n0, n1] = self.dims;
        let plans = match direction {
            FftDirection::Forward => &self.forward,
            FftDirection::Inverse => &self.inverse,
        };

        self.modulate(data, 1.);
        transform_rows(plans[0].as_ref(), data, n1);
        transpose(data, work, n0, n1);
        transform_rows(plans[1].as_ref(), work, n0);
        transpose(work, data, n1, n0);
        self.modulate(data, -1.);

        let scale = self.scale;
        data.par_iter_mut().for_each(|x| *x *= scale);
    }

    /// multiplies by the centering phase, conjugated when `sign` is negative
    fn modulate(&self, data: &mut [Complex32], sign: f32) {
        let n1 = self.dims[1];
        let [r0, r1] = &self.ramps;
        data.par_chunks_exact_mut(n1).zip(r0.par_iter()).for_each(|(row, p0)| {
            row.iter_mut().zip(r1).for_each(|(x, p1)| {
                let p = p0 * p1;
                *x *= if sign < 0. { p.conj() } else { p };
            });
        });
    }
}

fn transform_rows(fft: &dyn Fft<f32>, data: &mut [Complex32], row_len: usize) {
    let scratch_len = fft.get_inplace_scratch_len();
    data.par_chunks_exact_mut(row_len).for_each_init(
        || vec![Complex32::ZERO; scratch_len],
        |scratch, row| fft.process_with_scratch(row, scratch),
    );
}

/// writes the transpose of the (rows x cols) row-major `src` into `dst`
fn transpose(src: &[Complex32], dst: &mut [Complex32], rows: usize, cols: usize) {
    dst.par_chunks_exact_mut(rows).enumerate().for_each(|(c, dst_row)| {
        dst_row.iter_mut().enumerate().for_each(|(r, d)| *d = src[r * cols + c]);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_data(n: usize, seed: u64) -> Vec<Complex32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| Complex32::new(rng.random::<f32>() - 0.5, rng.random::<f32>() - 0.5)).collect()
    }

    fn dot(a: &[Complex32], b: &[Complex32]) -> Complex32 {
        a.iter().zip(b).map(|(x, y)| x.conj() * y).sum()
    }

    #[test]
    fn centered_delta_has_flat_spectrum() {
        let dims = [32, 64];
        let plan = Fft2Plan::new(dims);
        let mut data = vec![Complex32::ZERO; plan.len()];
        let mut work = data.clone();
        data[(dims[0] / 2) * dims[1] + dims[1] / 2] = Complex32::ONE;
        plan.fft2c(&mut data, &mut work, FftDirection::Forward);
        let expected = 1. / ((dims[0] * dims[1]) as f32).sqrt();
        for x in &data {
            assert_abs_diff_eq!(x.re, expected, epsilon = 1e-5);
            assert_abs_diff_eq!(x.im, 0., epsilon = 1e-5);
        }
    }

    #[test]
    fn inverse_undoes_forward() {
        let plan = Fft2Plan::new([64, 32]);
        let orig = random_data(plan.len(), 1);
        let mut data = orig.clone();
        let mut work = vec![Complex32::ZERO; plan.len()];
        plan.fft2c(&mut data, &mut work, FftDirection::Forward);
        plan.fft2c(&mut data, &mut work, FftDirection::Inverse);
        for (a, b) in data.iter().zip(&orig) {
            assert_abs_diff_eq!((a - b).norm(), 0., epsilon = 1e-5);
        }
    }

    #[test]
    fn inverse_is_adjoint_of_forward() {
        let plan = Fft2Plan::new([32, 32]);
        let x = random_data(plan.len(), 2);
        let y = random_data(plan.len(), 3);
        let mut work = vec![Complex32::ZERO; plan.len()];
        let mut fx = x.clone();
        plan.fft2c(&mut fx, &mut work, FftDirection::Forward);
        let mut fhy = y.clone();
        plan.fft2c(&mut fhy, &mut work, FftDirection::Inverse);
        let lhs = dot(&fx, &y);
        let rhs = dot(&x, &fhy);
        assert_abs_diff_eq!(lhs.re, rhs.re, epsilon = 1e-3);
        assert_abs_diff_eq!(lhs.im, rhs.im, epsilon = 1e-3);
    }
}
