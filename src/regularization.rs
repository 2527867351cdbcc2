// Optional regularization terms added to the normal equations

use crate::error::{ReconError, Result};
use crate::solver::LinearOperator;
use num_complex::Complex32;
use rayon::prelude::*;

/// An operator `R` that enters the normal equations as `kappa * R^H R`.
pub trait RegularizationTerm: LinearOperator + Send {
    /// writes diag(R^H R) into `diag`, one value per image voxel
    fn diagonal(&self, diag: &mut [f32]);

    fn as_operator(&mut self) -> &mut dyn LinearOperator;
}

/// Identity regularization: penalizes the image energy with weight kappa.
#[derive(Debug, Clone)]
pub struct Tikhonov {
    len: usize,
    kappa: f32,
}

impl Tikhonov {
    pub fn new(len: usize, kappa: f32) -> Self {
        Self { len, kappa }
    }
}

impl LinearOperator for Tikhonov {
    fn domain_len(&self) -> usize {
        self.len
    }

    fn weight(&self) -> f32 {
        self.kappa
    }

    fn mult_mh_m(&mut self, x: &[Complex32], out: &mut [Complex32]) -> Result<()> {
        if x.len() != self.len || out.len() != self.len {
            return Err(ReconError::Data(format!(
                "regularization expects {} values, got {} and {}",
                self.len,
                x.len(),
                out.len()
            )));
        }
        out.par_iter_mut().zip(x.par_iter()).for_each(|(o, x)| *o = *x);
        Ok(())
    }
}

impl RegularizationTerm for Tikhonov {
    fn diagonal(&self, diag: &mut [f32]) {
        diag.fill(1.);
    }

    fn as_operator(&mut self) -> &mut dyn LinearOperator {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_term() {
        let mut t = Tikhonov::new(3, 0.5);
        let x = [Complex32::new(1., 2.); 3];
        let mut out = [Complex32::ZERO; 3];
        t.mult_mh_m(&x, &mut out).unwrap();
        assert_eq!(out, x);
        assert_eq!(t.weight(), 0.5);
        assert!(t.mult_mh_m(&x[..2], &mut out).is_err());
    }
}
