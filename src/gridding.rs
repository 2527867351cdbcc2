//! Convolution gridding for the non-uniform Fourier transform.
//!
//! Samples live at normalized k-space coordinates in `[-0.5, 0.5)` along each axis. On the
//! oversampled grid of size `n_os` a coordinate `k` sits at `k * n_os + n_os / 2`, so the DC
//! sample lands on the grid center used by the centered FFT. Interpolation and spreading use a
//! separable Kaiser-Bessel kernel whose apodization is divided out in image space.
//! Grid addressing is periodic.

use crate::device::DeviceArray;
use crate::error::{ReconError, Result};
use crate::fft::{Fft2Plan, FftDirection};
use num_complex::Complex32;
use rayon::prelude::*;
use std::f64::consts::PI;

/// modified Bessel function of the first kind, order zero
fn bessel_i0(x: f64) -> f64 {
    let q = 0.25 * x * x;
    let mut term = 1.0;
    let mut sum = 1.0;
    let mut k = 1.0;
    while term > 1e-12 * sum {
        term *= q / (k * k);
        sum += term;
        k += 1.0;
    }
    sum
}

/// Kaiser-Bessel kernel of a given width (in oversampled grid units)
#[derive(Debug, Clone, Copy)]
pub struct KaiserBessel {
    width: f64,
    beta: f64,
    norm: f64,
}

impl KaiserBessel {
    /// shape parameter after Beatty et al. for the oversampling ratio `alpha`
    pub fn new(width: f32, alpha: f32) -> Self {
        let width = width as f64;
        let alpha = alpha as f64;
        let arg = (width / alpha).powi(2) * (alpha - 0.5).powi(2) - 0.8;
        let beta = PI * arg.max(0.).sqrt();
        // unit peak
        Self { width, beta, norm: 1. / bessel_i0(beta) }
    }

    pub fn half_width(&self) -> f64 {
        0.5 * self.width
    }

    pub fn eval(&self, u: f64) -> f64 {
        let r = 2. * u / self.width;
        if r.abs() > 1. {
            return 0.;
        }
        bessel_i0(self.beta * (1. - r * r).sqrt()) * self.norm
    }

    /// image-space apodization of the kernel sampled at integer grid offsets, evaluated at
    /// position `x` (pixels from the center) on a grid of `n_os` points
    fn apodization(&self, x: f64, n_os: usize) -> f64 {
        let reach = self.half_width().floor() as i64;
        (-reach..=reach)
            .map(|m| self.eval(m as f64) * (2. * PI * m as f64 * x / n_os as f64).cos())
            .sum()
    }
}

pub struct GriddingPlan {
    matrix_size: [usize; 2],
    matrix_size_os: [usize; 2],
    kernels: [KaiserBessel; 2],
    taps: usize,
    deapodization: Vec<f32>,
    fft: Fft2Plan,
    n_samples: usize,
    start: Vec<[i64; 2]>,
    weights: Vec<f32>,
}

impl GriddingPlan {
    pub fn setup(matrix_size: [usize; 2], matrix_size_os: [usize; 2], kernel_width: f32) -> Result<Self> {
        for (&m, &os) in matrix_size.iter().zip(&matrix_size_os) {
            if m == 0 || os < m {
                return Err(ReconError::Configuration(format!(
                    "oversampled matrix {:?} must cover matrix {:?}",
                    matrix_size_os, matrix_size
                )));
            }
            if kernel_width <= 0. || kernel_width as usize >= os {
                return Err(ReconError::Configuration(format!(
                    "kernel width {kernel_width} does not fit a grid of {os} points"
                )));
            }
        }

        let kernels = [0, 1].map(|d| KaiserBessel::new(kernel_width, matrix_size_os[d] as f32 / matrix_size[d] as f32));
        let taps = kernel_width.floor() as usize + 1;

        let apod: [Vec<f64>; 2] = [0, 1].map(|d| {
            let half = (matrix_size[d] / 2) as f64;
            (0..matrix_size[d]).map(|i| kernels[d].apodization(i as f64 - half, matrix_size_os[d])).collect()
        });
        let peak = apod[0][matrix_size[0] / 2] * apod[1][matrix_size[1] / 2];
        let mut deapodization = Vec::with_capacity(matrix_size[0] * matrix_size[1]);
        for a0 in &apod[0] {
            for a1 in &apod[1] {
                let a = a0 * a1;
                // a vanishing apodization would only amplify noise, leave such pixels empty
                deapodization.push(if a.abs() > 1e-6 * peak.abs() { (1. / a) as f32 } else { 0. });
            }
        }

        Ok(Self {
            matrix_size,
            matrix_size_os,
            kernels,
            taps,
            deapodization,
            fft: Fft2Plan::new(matrix_size_os),
            n_samples: 0,
            start: Vec::new(),
            weights: Vec::new(),
        })
    }

    pub fn matrix_size(&self) -> [usize; 2] {
        self.matrix_size
    }

    pub fn matrix_size_os(&self) -> [usize; 2] {
        self.matrix_size_os
    }

    pub fn image_len(&self) -> usize {
        self.matrix_size.iter().product()
    }

    pub fn grid_len(&self) -> usize {
        self.matrix_size_os.iter().product()
    }

    /// number of samples covered by the last call to [GriddingPlan::preprocess]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Builds the kernel lookup for a trajectory. Previous lookup storage is reused.
    pub fn preprocess(&mut self, trajectory: &DeviceArray<[f32; 2]>) -> Result<()> {
        let traj = trajectory.as_slice();
        if let Some(bad) = traj.iter().find(|k| k.iter().any(|c| !c.is_finite())) {
            return Err(ReconError::Data(format!("trajectory contains a non-finite coordinate {:?}", bad)));
        }
        let taps = self.taps;
        let n = traj.len();
        self.n_samples = n;
        self.start.clear();
        self.start.resize(n, [0; 2]);
        self.weights.clear();
        self.weights.resize(n * 2 * taps, 0.);

        let kernels = &self.kernels;
        let grid = self.matrix_size_os;
        self.start
            .par_iter_mut()
            .zip(self.weights.par_chunks_exact_mut(2 * taps))
            .zip(traj.par_iter())
            .for_each(|((start, w), k)| {
                for d in 0..2 {
                    let g = k[d] as f64 * grid[d] as f64 + (grid[d] / 2) as f64;
                    let first = (g - kernels[d].half_width()).ceil();
                    start[d] = first as i64;
                    for t in 0..taps {
                        w[d * taps + t] = kernels[d].eval(first + t as f64 - g) as f32;
                    }
                }
            });
        Ok(())
    }

    /// grid -> samples
    fn interpolate(&self, grid: &[Complex32], samples: &mut [Complex32]) {
        let taps = self.taps;
        let [n0, n1] = self.matrix_size_os;
        samples
            .par_iter_mut()
            .zip(self.start.par_iter())
            .zip(self.weights.par_chunks_exact(2 * taps))
            .for_each(|((s, start), w)| {
                let mut acc = Complex32::ZERO;
                for t0 in 0..taps {
                    let w0 = w[t0];
                    if w0 == 0. {
                        continue;
                    }
                    let row = wrap(start[0] + t0 as i64, n0) * n1;
                    for t1 in 0..taps {
                        acc += grid[row + wrap(start[1] + t1 as i64, n1)] * (w0 * w[taps + t1]);
                    }
                }
                *s = acc;
            });
    }

    /// samples -> grid (accumulating)
    fn spread(&self, samples: &[Complex32], grid: &mut [Complex32]) {
        let taps = self.taps;
        let [n0, n1] = self.matrix_size_os;
        for ((s, start), w) in samples.iter().zip(&self.start).zip(self.weights.chunks_exact(2 * taps)) {
            for t0 in 0..taps {
                let w0 = w[t0];
                if w0 == 0. {
                    continue;
                }
                let row = wrap(start[0] + t0 as i64, n0) * n1;
                for t1 in 0..taps {
                    grid[row + wrap(start[1] + t1 as i64, n1)] += s * (w0 * w[taps + t1]);
                }
            }
        }
    }

    fn offsets(&self) -> [usize; 2] {
        [0, 1].map(|d| self.matrix_size_os[d] / 2 - self.matrix_size[d] / 2)
    }

    /// Non-uniform forward transform of one image: de-apodize, zero-pad, FFT, interpolate.
    /// `grid` and `work` are scratch buffers of the oversampled grid size.
    pub fn forward(&self, image: &[Complex32], grid: &mut [Complex32], work: &mut [Complex32], samples: &mut [Complex32]) {
        debug_assert_eq!(samples.len(), self.n_samples);
        let [m0, m1] = self.matrix_size;
        let n1 = self.matrix_size_os[1];
        let [off0, off1] = self.offsets();
        grid.fill(Complex32::ZERO);
        grid[off0 * n1..(off0 + m0) * n1]
            .par_chunks_exact_mut(n1)
            .zip(image.par_chunks_exact(m1))
            .zip(self.deapodization.par_chunks_exact(m1))
            .for_each(|((g, img), d)| {
                g[off1..off1 + m1].iter_mut().zip(img).zip(d).for_each(|((g, x), d)| *g = x * d);
            });
        self.fft.fft2c(grid, work, FftDirection::Forward);
        self.interpolate(grid, samples);
    }

    /// Adjoint of [GriddingPlan::forward]: spread, inverse FFT, crop, de-apodize.
    pub fn adjoint(&self, samples: &[Complex32], grid: &mut [Complex32], work: &mut [Complex32], image: &mut [Complex32]) {
        debug_assert_eq!(samples.len(), self.n_samples);
        let m1 = self.matrix_size[1];
        let n1 = self.matrix_size_os[1];
        let [off0, off1] = self.offsets();
        grid.fill(Complex32::ZERO);
        self.spread(samples, grid);
        self.fft.fft2c(grid, work, FftDirection::Inverse);
        image
            .par_chunks_exact_mut(m1)
            .zip(self.deapodization.par_chunks_exact(m1))
            .enumerate()
            .for_each(|(i0, (img, d))| {
                let g = &grid[(i0 + off0) * n1 + off1..(i0 + off0) * n1 + off1 + m1];
                img.iter_mut().zip(g).zip(d).for_each(|((x, g), d)| *x = g * d);
            });
    }
}

#[inline(always)]
fn wrap(index: i64, n: usize) -> usize {
    index.rem_euclid(n as i64) as usize
}
