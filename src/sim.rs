//! Synthetic acquisitions for demos and end-to-end tests.
//!
//! Objects are sums of point sources placed at pixel offsets from the image center. A source at
//! `x` contributes `a * csm_c(x) * exp(-2 pi i k.x)` to channel `c` at normalized k-space position
//! `k`, which is the convention of the encoding operator.

use crate::error::{ReconError, Result};
use crate::message::{AcquisitionHeader, AcquisitionProfile};
use crate::params::ScanParams;
use crate::trajectory::{GoldenAngleRadial, TrajectoryStrategy};
use ndarray::{Array2, Array3};
use num_complex::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSource {
    /// pixels from the image center along both axes
    pub offset: [f32; 2],
    pub amplitude: Complex32,
}

impl PointSource {
    pub fn new(offset: [f32; 2], amplitude: f32) -> Self {
        Self { offset, amplitude: Complex32::new(amplitude, 0.) }
    }

    /// pixel index of the source on a matrix of size `matrix_size`
    pub fn pixel(&self, matrix_size: [usize; 2]) -> [usize; 2] {
        [0, 1].map(|d| (self.offset[d].round() as i64 + (matrix_size[d] / 2) as i64) as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilModel {
    Uniform,
    /// coils evenly spaced on a ring around the field of view
    Birdcage,
}

/// coil sensitivity maps of shape `(channels, m0, m1)`
pub fn coil_maps(model: CoilModel, channels: usize, matrix_size: [usize; 2]) -> Array3<Complex32> {
    let [m0, m1] = matrix_size;
    match model {
        CoilModel::Uniform => Array3::from_elem((channels, m0, m1), Complex32::ONE),
        CoilModel::Birdcage => {
            let radius = 0.75 * m0.max(m1) as f32;
            Array3::from_shape_fn((channels, m0, m1), |(c, i0, i1)| {
                let phi = 2. * PI * c as f32 / channels as f32;
                let (sin, cos) = phi.sin_cos();
                let d0 = i0 as f32 - (m0 / 2) as f32 - radius * cos;
                let d1 = i1 as f32 - (m1 / 2) as f32 - radius * sin;
                let dist = (d0 * d0 + d1 * d1).sqrt() / radius;
                Complex32::from_polar(1. / (1. + dist * dist), phi)
            })
        }
    }
}

/// Generates the profiles of a continuous golden-angle radial scan of one slice. Profile `p` is
/// the spoke the golden-angle trajectory assigns to profile offset `p`.
pub struct AcquisitionSimulator {
    scan: ScanParams,
    slice: u16,
    sources: Vec<PointSource>,
    csm: Array3<Complex32>,
    noise_std: f32,
    rng: StdRng,
    next_profile: usize,
    k: Vec<[f32; 2]>,
}

impl AcquisitionSimulator {
    pub fn new(scan: ScanParams, seed: u64) -> Result<Self> {
        scan.validate()?;
        Ok(Self {
            csm: coil_maps(CoilModel::Uniform, scan.channels, scan.matrix_size),
            scan,
            slice: 0,
            sources: Vec::new(),
            noise_std: 0.,
            rng: StdRng::seed_from_u64(seed),
            next_profile: 0,
            k: Vec::new(),
        })
    }

    pub fn with_slice(mut self, slice: u16) -> Self {
        self.slice = slice;
        self
    }

    pub fn with_source(mut self, source: PointSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_coils(mut self, csm: Array3<Complex32>) -> Result<Self> {
        let [m0, m1] = self.scan.matrix_size;
        if csm.dim() != (self.scan.channels, m0, m1) {
            return Err(ReconError::Configuration(format!(
                "coil maps of shape {:?} do not match the scan ({}, {m0}, {m1})",
                csm.dim(),
                self.scan.channels
            )));
        }
        self.csm = csm;
        Ok(self)
    }

    /// complex gaussian noise with standard deviation `std` per real component
    pub fn with_noise(mut self, std: f32) -> Self {
        self.noise_std = std;
        self
    }

    pub fn csm(&self) -> &Array3<Complex32> {
        &self.csm
    }

    fn gaussian(&mut self) -> f32 {
        // Box-Muller
        let u1: f32 = self.rng.random::<f32>().max(f32::MIN_POSITIVE);
        let u2: f32 = self.rng.random();
        (-2. * u1.ln()).sqrt() * (2. * PI * u2).cos()
    }

    /// the next profile of the scan
    pub fn next_profile(&mut self) -> Result<AcquisitionProfile> {
        let p = self.next_profile;
        let sp = self.scan.readout_length;
        GoldenAngleRadial.compute(p, 1, sp, &mut self.k)?;

        let mut data = Array2::zeros((self.scan.channels, sp));
        for source in &self.sources {
            let [i0, i1] = source.pixel(self.scan.matrix_size);
            for (c, mut row) in data.outer_iter_mut().enumerate() {
                let s = source.amplitude * self.csm[[c, i0, i1]];
                row.iter_mut().zip(&self.k).for_each(|(y, k)| {
                    let phase = -2. * PI * (k[0] * source.offset[0] + k[1] * source.offset[1]);
                    *y += s * Complex32::from_polar(1., phase);
                });
            }
        }
        if self.noise_std > 0. {
            let std = self.noise_std;
            let noise: Vec<Complex32> =
                (0..data.len()).map(|_| Complex32::new(self.gaussian(), self.gaussian()) * std).collect();
            data.iter_mut().zip(noise).for_each(|(y, n)| *y += n);
        }

        let mut header = AcquisitionHeader::default();
        header.idx.kspace_encode_step_1 = (p % (u16::MAX as usize + 1)) as u16;
        header.idx.slice = self.slice;
        header.position = [0., 0., self.slice as f32];
        header.quaternion = [0., 0., 0., 1.];
        self.next_profile += 1;
        AcquisitionProfile::new(header, data)
    }
}
