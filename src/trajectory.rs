//! Pluggable trajectory and density compensation strategies.
//!
//! Both are recomputed for every frame. The trajectory can depend on the running profile offset
//! (golden-angle schemes keep rotating across frames), so nothing here is cached.

use crate::error::{ReconError, Result};
use crate::params::TrajectoryKind;

/// angle increment between consecutive golden-angle spokes, pi / golden ratio
pub fn golden_angle() -> f64 {
    std::f64::consts::PI * (5f64.sqrt() - 1.) / 2.
}

pub trait TrajectoryStrategy: Send {
    /// Writes `profiles_per_frame * samples_per_profile` normalized k-space coordinates, profile
    /// major. `profile_offset` is the acquisition number of the first profile in the frame.
    fn compute(
        &self,
        profile_offset: usize,
        profiles_per_frame: usize,
        samples_per_profile: usize,
        trajectory: &mut Vec<[f32; 2]>,
    ) -> Result<()>;
}

pub trait DensityCompensation: Send {
    /// Writes one weight per trajectory sample.
    fn compute(&self, trajectory: &[[f32; 2]], samples_per_profile: usize, weights: &mut Vec<f32>) -> Result<()>;
}

fn check_frame(profiles_per_frame: usize, samples_per_profile: usize) -> Result<()> {
    if profiles_per_frame == 0 || samples_per_profile == 0 {
        return Err(ReconError::Data(format!(
            "cannot build a trajectory for {profiles_per_frame} profiles of {samples_per_profile} samples"
        )));
    }
    Ok(())
}

/// readout position of sample `s`, in [-0.5, 0.5)
#[inline]
fn readout_coord(s: usize, samples_per_profile: usize) -> f32 {
    (s as f32 - (samples_per_profile / 2) as f32) / samples_per_profile as f32
}

fn radial(angles: impl Iterator<Item = f32>, samples_per_profile: usize, trajectory: &mut Vec<[f32; 2]>) {
    trajectory.clear();
    for theta in angles {
        let (sin, cos) = theta.sin_cos();
        trajectory.extend((0..samples_per_profile).map(|s| {
            let k = readout_coord(s, samples_per_profile);
            [k * cos, k * sin]
        }));
    }
}

/// Radial spokes rotated by the golden angle, continuing across frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoldenAngleRadial;

impl TrajectoryStrategy for GoldenAngleRadial {
    fn compute(&self, profile_offset: usize, profiles_per_frame: usize, samples_per_profile: usize, trajectory: &mut Vec<[f32; 2]>) -> Result<()> {
        check_frame(profiles_per_frame, samples_per_profile)?;
        let step = golden_angle();
        let angles = (profile_offset..profile_offset + profiles_per_frame)
            .map(|p| ((p as f64 * step) % std::f64::consts::PI) as f32);
        radial(angles, samples_per_profile, trajectory);
        Ok(())
    }
}

/// Radial spokes evenly spread over pi, identical for every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedAngleRadial;

impl TrajectoryStrategy for FixedAngleRadial {
    fn compute(&self, _profile_offset: usize, profiles_per_frame: usize, samples_per_profile: usize, trajectory: &mut Vec<[f32; 2]>) -> Result<()> {
        check_frame(profiles_per_frame, samples_per_profile)?;
        let angles = (0..profiles_per_frame).map(|p| std::f32::consts::PI * p as f32 / profiles_per_frame as f32);
        radial(angles, samples_per_profile, trajectory);
        Ok(())
    }
}

/// Each profile is one line along axis 1; profile `p` sits at line `p` along axis 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cartesian;

impl TrajectoryStrategy for Cartesian {
    fn compute(&self, _profile_offset: usize, profiles_per_frame: usize, samples_per_profile: usize, trajectory: &mut Vec<[f32; 2]>) -> Result<()> {
        check_frame(profiles_per_frame, samples_per_profile)?;
        trajectory.clear();
        for p in 0..profiles_per_frame {
            let k0 = readout_coord(p, profiles_per_frame);
            trajectory.extend((0..samples_per_profile).map(|s| [k0, readout_coord(s, samples_per_profile)]));
        }
        Ok(())
    }
}

/// |k| ramp for radial sampling. The DC sample gets the area of the central ring segment
/// instead of zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadialRamp;

impl DensityCompensation for RadialRamp {
    fn compute(&self, trajectory: &[[f32; 2]], samples_per_profile: usize, weights: &mut Vec<f32>) -> Result<()> {
        if samples_per_profile == 0 {
            return Err(ReconError::Data("zero samples per profile".to_string()));
        }
        let floor = 0.25 / samples_per_profile as f32;
        weights.clear();
        weights.extend(trajectory.iter().map(|k| (k[0] * k[0] + k[1] * k[1]).sqrt().max(floor)));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Uniform;

impl DensityCompensation for Uniform {
    fn compute(&self, trajectory: &[[f32; 2]], _samples_per_profile: usize, weights: &mut Vec<f32>) -> Result<()> {
        weights.clear();
        weights.resize(trajectory.len(), 1.);
        Ok(())
    }
}

/// default strategy pair for a trajectory kind
pub fn strategies_for(kind: TrajectoryKind) -> (Box<dyn TrajectoryStrategy>, Box<dyn DensityCompensation>) {
    match kind {
        TrajectoryKind::GoldenAngleRadial => (Box::new(GoldenAngleRadial), Box::new(RadialRamp)),
        TrajectoryKind::FixedAngleRadial => (Box::new(FixedAngleRadial), Box::new(RadialRamp)),
        TrajectoryKind::Cartesian => (Box::new(Cartesian), Box::new(Uniform)),
    }
}
