//! Matrix-free preconditioned conjugate gradient on complex device arrays.
//!
//! The solver minimizes `sum_i w_i ||A_i x - b_i||^2` through the normal equations
//! `(sum_i w_i A_i^H A_i) x = rhs`, starting from a zero image. Reaching the iteration cap is not
//! an error: the current estimate is returned together with a [SolveReport]. Only allocation
//! failures make a solve fail.

use crate::device::{Device, DeviceArray};
use crate::error::{ReconError, Result};
use crate::params::OutputMode;
use crate::precond::PrecondWeights;
use num_complex::Complex32;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A linear operator contributing `A^H A` to the normal equations.
pub trait LinearOperator {
    /// length of the image the operator acts on
    fn domain_len(&self) -> usize;

    /// scalar weight of this term in the normal equations
    fn weight(&self) -> f32 {
        1.
    }

    /// out = A^H A x
    fn mult_mh_m(&mut self, x: &[Complex32], out: &mut [Complex32]) -> Result<()>;
}

/// The operators making up one solve, borrowed for its duration.
#[derive(Default)]
pub struct NormalEquations<'a> {
    operators: Vec<&'a mut dyn LinearOperator>,
}

impl<'a> NormalEquations<'a> {
    pub fn new() -> Self {
        Self { operators: Vec::new() }
    }

    pub fn add_operator(&mut self, op: &'a mut dyn LinearOperator) {
        self.operators.push(op);
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// out = sum_i w_i A_i^H A_i x, `tmp` is scratch of the same length
    fn apply(&mut self, x: &[Complex32], out: &mut [Complex32], tmp: &mut [Complex32]) -> Result<()> {
        let mut first = true;
        for op in self.operators.iter_mut() {
            let w = op.weight();
            if first {
                op.mult_mh_m(x, out)?;
                if w != 1. {
                    out.par_iter_mut().for_each(|o| *o *= w);
                }
                first = false;
            } else {
                op.mult_mh_m(x, tmp)?;
                out.par_iter_mut().zip(tmp.par_iter()).for_each(|(o, t)| *o += t * w);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// relative residual dropped below the limit
    Converged,
    /// iteration cap reached first
    IterationLimitReached,
    /// the search direction lost positivity or became non-finite, the last good estimate is kept
    Breakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// ||r|| / ||rhs|| at exit
    pub relative_residual: f32,
    pub status: SolveStatus,
}

struct CgWorkspace {
    x: DeviceArray<Complex32>,
    r: DeviceArray<Complex32>,
    z: DeviceArray<Complex32>,
    p: DeviceArray<Complex32>,
    q: DeviceArray<Complex32>,
    tmp: DeviceArray<Complex32>,
}

impl CgWorkspace {
    fn new(device: &Device, n: usize) -> Result<Self> {
        Ok(Self {
            x: device.alloc_zeroed(n)?,
            r: device.alloc_zeroed(n)?,
            z: device.alloc_zeroed(n)?,
            p: device.alloc_zeroed(n)?,
            q: device.alloc_zeroed(n)?,
            tmp: device.alloc_zeroed(n)?,
        })
    }
}

pub struct CgSolver {
    device: Device,
    iterations: usize,
    limit: f32,
    output_mode: OutputMode,
    precond: Option<PrecondWeights>,
    workspace: Option<CgWorkspace>,
}

impl CgSolver {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            iterations: 5,
            limit: 1e-6,
            output_mode: OutputMode::Silent,
            precond: None,
            workspace: None,
        }
    }

    pub fn set_iteration_limit(&mut self, iterations: usize) {
        self.iterations = iterations;
    }

    pub fn set_tolerance(&mut self, limit: f32) {
        self.limit = limit;
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.output_mode = mode;
    }

    pub fn iteration_limit(&self) -> usize {
        self.iterations
    }

    pub fn tolerance(&self) -> f32 {
        self.limit
    }

    /// installs new preconditioning weights, returning the previous ones for re-use
    pub fn set_preconditioner(&mut self, weights: PrecondWeights) -> Option<PrecondWeights> {
        self.precond.replace(weights)
    }

    pub fn take_preconditioner(&mut self) -> Option<PrecondWeights> {
        self.precond.take()
    }

    /// allocates the iteration vectors, keeping existing ones when the size is unchanged
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        if self.workspace.as_ref().map(|ws| ws.x.len()) != Some(n) {
            self.workspace = None;
            self.workspace = Some(CgWorkspace::new(&self.device, n)?);
        }
        Ok(())
    }

    /// the estimate produced by the last call to [CgSolver::solve]
    pub fn solution(&self) -> &[Complex32] {
        self.workspace.as_ref().map(|ws| ws.x.as_slice()).unwrap_or(&[])
    }

    pub fn solve(&mut self, system: &mut NormalEquations<'_>, rhs: &[Complex32]) -> Result<SolveReport> {
        if system.is_empty() {
            return Err(ReconError::Configuration("solver has no operators".to_string()));
        }
        let n = rhs.len();
        if let Some(bad) = system.operators.iter().find(|op| op.domain_len() != n) {
            return Err(ReconError::Data(format!("operator acts on {} values, rhs has {n}", bad.domain_len())));
        }
        if let Some(w) = &self.precond {
            if w.len() != n {
                return Err(ReconError::Data(format!("preconditioner has {} weights, rhs has {n}", w.len())));
            }
        }
        self.reserve(n)?;
        let precond = self.precond.as_ref();
        let ws = self.workspace.as_mut().ok_or_else(|| ReconError::Resource("solver workspace missing".to_string()))?;
        let CgWorkspace { x, r, z, p, q, tmp } = ws;
        let (x, r, z, p, q, tmp) =
            (x.as_mut_slice(), r.as_mut_slice(), z.as_mut_slice(), p.as_mut_slice(), q.as_mut_slice(), tmp.as_mut_slice());

        x.fill(Complex32::ZERO);
        r.copy_from_slice(rhs);
        let rhs_norm = norm(rhs);
        if rhs_norm == 0. {
            return Ok(SolveReport { iterations: 0, relative_residual: 0., status: SolveStatus::Converged });
        }

        precondition(precond, r, z);
        p.copy_from_slice(z);
        let mut rz = dot_re(r, z);

        let mut report = SolveReport { iterations: 0, relative_residual: 1., status: SolveStatus::IterationLimitReached };
        for it in 1..=self.iterations {
            system.apply(p, q, tmp)?;
            let pq = dot_re(p, q);
            if !(pq > 0.) || !pq.is_finite() || !rz.is_finite() {
                report.status = SolveStatus::Breakdown;
                break;
            }
            let alpha = rz / pq;
            x.par_iter_mut().zip(p.par_iter()).for_each(|(x, p)| *x += p * alpha);
            r.par_iter_mut().zip(q.par_iter()).for_each(|(r, q)| *r -= q * alpha);

            report.iterations = it;
            report.relative_residual = norm(r) / rhs_norm;
            if self.output_mode == OutputMode::Verbose {
                debug!(iteration = it, residual = report.relative_residual, "cg iteration");
            }
            if report.relative_residual < self.limit {
                report.status = SolveStatus::Converged;
                break;
            }

            precondition(precond, r, z);
            let rz_next = dot_re(r, z);
            let beta = rz_next / rz;
            rz = rz_next;
            p.par_iter_mut().zip(z.par_iter()).for_each(|(p, z)| *p = z + *p * beta);
        }

        match self.output_mode {
            OutputMode::Verbose => info!(
                iterations = report.iterations,
                residual = report.relative_residual,
                status = ?report.status,
                "cg solve finished"
            ),
            OutputMode::Silent => debug!(
                iterations = report.iterations,
                residual = report.relative_residual,
                status = ?report.status,
                "cg solve finished"
            ),
        }
        Ok(report)
    }
}

fn precondition(precond: Option<&PrecondWeights>, r: &[Complex32], z: &mut [Complex32]) {
    match precond {
        Some(w) => w.apply(r, z),
        None => z.copy_from_slice(r),
    }
}

/// Re <a, b>
fn dot_re(a: &[Complex32], b: &[Complex32]) -> f32 {
    a.par_iter().zip(b.par_iter()).map(|(a, b)| a.re * b.re + a.im * b.im).sum()
}

fn norm(a: &[Complex32]) -> f32 {
    a.par_iter().map(|a| a.norm_sqr()).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precond::Preconditioner;
    use approx::assert_abs_diff_eq;

    /// diagonal test operator, A^H A = diag(d)
    struct Diagonal(Vec<f32>);

    impl LinearOperator for Diagonal {
        fn domain_len(&self) -> usize {
            self.0.len()
        }

        fn mult_mh_m(&mut self, x: &[Complex32], out: &mut [Complex32]) -> Result<()> {
            out.iter_mut().zip(x).zip(&self.0).for_each(|((o, x), d)| *o = x * d);
            Ok(())
        }
    }

    fn rhs(n: usize) -> Vec<Complex32> {
        (0..n).map(|i| Complex32::new(i as f32 + 1., -(i as f32))).collect()
    }

    #[test]
    fn preconditioned_diagonal_system_converges_in_one_step() {
        let device = Device::select(0).unwrap();
        let d: Vec<f32> = (0..16).map(|i| 1. + i as f32).collect();
        let b = rhs(16);

        // exact inverse diagonal as preconditioner
        let csm: Vec<Complex32> = d.iter().map(|d| Complex32::new(d.sqrt(), 0.)).collect();
        let mut precond = Preconditioner::new(device.clone());
        let weights = precond.update(&csm, 1, None, None).unwrap();

        let mut solver = CgSolver::new(device);
        solver.set_iteration_limit(10);
        solver.set_tolerance(1e-4);
        solver.set_preconditioner(weights);
        let mut op = Diagonal(d.clone());
        let mut system = NormalEquations::new();
        system.add_operator(&mut op);
        let report = solver.solve(&mut system, &b).unwrap();

        assert_eq!(report.status, SolveStatus::Converged);
        assert_eq!(report.iterations, 1);
        for ((x, b), d) in solver.solution().iter().zip(&b).zip(&d) {
            assert_abs_diff_eq!((x * *d - b).norm(), 0., epsilon = 1e-4);
        }
    }

    #[test]
    fn iteration_cap_still_yields_an_estimate() {
        let device = Device::select(0).unwrap();
        let d: Vec<f32> = (0..64).map(|i| 1. + (i * i) as f32).collect();
        let mut solver = CgSolver::new(device);
        solver.set_iteration_limit(2);
        solver.set_tolerance(1e-9);
        let mut op = Diagonal(d);
        let mut system = NormalEquations::new();
        system.add_operator(&mut op);
        let report = solver.solve(&mut system, &rhs(64)).unwrap();
        assert_eq!(report.status, SolveStatus::IterationLimitReached);
        assert_eq!(report.iterations, 2);
        assert!(report.relative_residual < 1.);
        assert!(solver.solution().iter().any(|x| x.norm() > 0.));
    }

    #[test]
    fn weighted_operators_are_summed() {
        struct Scaled(Diagonal, f32);
        impl LinearOperator for Scaled {
            fn domain_len(&self) -> usize {
                self.0.domain_len()
            }
            fn weight(&self) -> f32 {
                self.1
            }
            fn mult_mh_m(&mut self, x: &[Complex32], out: &mut [Complex32]) -> Result<()> {
                self.0.mult_mh_m(x, out)
            }
        }

        let device = Device::select(0).unwrap();
        let mut solver = CgSolver::new(device);
        solver.set_iteration_limit(20);
        let mut a = Diagonal(vec![2.; 8]);
        let mut b = Scaled(Diagonal(vec![1.; 8]), 2.);
        let mut system = NormalEquations::new();
        system.add_operator(&mut a);
        system.add_operator(&mut b);
        let rhs = vec![Complex32::new(4., 8.); 8];
        solver.solve(&mut system, &rhs).unwrap();
        for x in solver.solution() {
            assert_abs_diff_eq!(x.re, 1., epsilon = 1e-5);
            assert_abs_diff_eq!(x.im, 2., epsilon = 1e-5);
        }
    }

    #[test]
    fn zero_rhs_gives_zero_image() {
        let device = Device::select(0).unwrap();
        let mut solver = CgSolver::new(device);
        let mut op = Diagonal(vec![1.; 4]);
        let mut system = NormalEquations::new();
        system.add_operator(&mut op);
        let report = solver.solve(&mut system, &[Complex32::ZERO; 4]).unwrap();
        assert_eq!(report.iterations, 0);
        assert!(solver.solution().iter().all(|x| *x == Complex32::ZERO));
    }

    #[test]
    fn workspace_is_reused() {
        let device = Device::with_memory_limit(0, 1 << 20).unwrap();
        let mut solver = CgSolver::new(device.clone());
        solver.reserve(32).unwrap();
        let (free, _) = device.memory_info();
        solver.reserve(32).unwrap();
        assert_eq!(device.memory_info().0, free);
    }
}
