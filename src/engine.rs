//! Streaming CG-SENSE reconstruction of one slice.
//!
//! An [UnconfiguredEngine] becomes a [ConfiguredEngine] exactly once, when the scan geometry is
//! known. The configured engine buffers incoming profiles and, whenever a full frame is
//! available, reconstructs it synchronously before accepting the next profile. [CgSenseNode]
//! wraps both states for callers that only learn about the geometry at runtime.

use crate::buffer::ProfileBuffer;
use crate::device::{Device, DeviceArray};
use crate::encoding::EncodingOperator;
use crate::error::{ReconError, Result};
use crate::message::{AcquisitionProfile, ImageHeader, Message, ReconImage};
use crate::params::{EncodingState, ReconParams, RegularizationKind, ScanParams};
use crate::precond::Preconditioner;
use crate::regularization::{RegularizationTerm, Tikhonov};
use crate::solver::{CgSolver, NormalEquations};
use crate::stage::SampleStager;
use crate::strategy::{CsmUpdate, FrameContext, KeepCsm, NoDecorrelation, NoiseDecorrelation};
use crate::trajectory::{strategies_for, DensityCompensation, TrajectoryStrategy};
use ndarray::{Array2, Array3};
use num_complex::Complex32;
use std::fmt;
use tracing::{debug, info, warn};

/// What happened to one incoming message.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// the profile was buffered, no frame was ready yet
    Buffered,
    /// the message is not for this node and continues down the chain unchanged
    Forwarded(Message),
    /// a profile of another slice was discarded
    Dropped,
    Reconstructed(ReconImage),
}

/// Reconstruction strategies that are plugged in at construction.
struct Strategies {
    trajectory: Box<dyn TrajectoryStrategy>,
    dcw: Box<dyn DensityCompensation>,
    csm_update: Box<dyn CsmUpdate>,
    noise: Box<dyn NoiseDecorrelation>,
    regularization: Option<Box<dyn RegularizationTerm>>,
}

pub struct UnconfiguredEngine {
    params: ReconParams,
    device: Option<Device>,
    csm: Option<Array3<Complex32>>,
    strategies: Strategies,
}

impl fmt::Debug for UnconfiguredEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnconfiguredEngine")
            .field("params", &self.params)
            .field("device", &self.device)
            .field("csm", &self.csm.as_ref().map(|c| c.dim()))
            .finish_non_exhaustive()
    }
}

/// Returned when configuration fails. The engine is handed back unchanged.
#[derive(Debug)]
pub struct ConfigureError {
    pub engine: Box<UnconfiguredEngine>,
    pub error: ReconError,
}

impl fmt::Display for ConfigureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine configuration failed: {}", self.error)
    }
}

impl std::error::Error for ConfigureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl UnconfiguredEngine {
    pub fn new(params: ReconParams) -> Result<Self> {
        params.validate()?;
        let (trajectory, dcw) = strategies_for(params.trajectory);
        Ok(Self {
            params,
            device: None,
            csm: None,
            strategies: Strategies {
                trajectory,
                dcw,
                csm_update: Box::new(KeepCsm),
                noise: Box::new(NoDecorrelation),
                regularization: None,
            },
        })
    }

    pub fn params(&self) -> &ReconParams {
        &self.params
    }

    /// runs on `device` instead of the one named by `device_number`
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// coil maps of shape `(channels, m0, m1)`, checked against the geometry at configuration
    pub fn with_csm(mut self, csm: Array3<Complex32>) -> Self {
        self.csm = Some(csm);
        self
    }

    pub fn with_trajectory(mut self, trajectory: Box<dyn TrajectoryStrategy>, dcw: Box<dyn DensityCompensation>) -> Self {
        self.strategies.trajectory = trajectory;
        self.strategies.dcw = dcw;
        self
    }

    pub fn with_csm_update(mut self, csm_update: Box<dyn CsmUpdate>) -> Self {
        self.strategies.csm_update = csm_update;
        self
    }

    pub fn with_noise_decorrelation(mut self, noise: Box<dyn NoiseDecorrelation>) -> Self {
        self.strategies.noise = noise;
        self
    }

    /// overrides the term selected by the `regularization` parameter
    pub fn with_regularization(mut self, regularization: Box<dyn RegularizationTerm>) -> Self {
        self.strategies.regularization = Some(regularization);
        self
    }

    /// Derives the encoding geometry and allocates everything the engine needs for the slice.
    pub fn configure(self, scan: &ScanParams) -> std::result::Result<ConfiguredEngine, ConfigureError> {
        let mut engine = self;
        match engine.build(scan) {
            Ok(parts) => {
                let UnconfiguredEngine { params, strategies, .. } = engine;
                Ok(ConfiguredEngine::assemble(params, strategies, parts))
            }
            Err(error) => {
                warn!(%error, "configuration failed, engine stays unconfigured");
                Err(ConfigureError { engine: Box::new(engine), error })
            }
        }
    }

    fn build(&mut self, scan: &ScanParams) -> Result<Parts> {
        let state = EncodingState::derive(scan, &self.params)?;
        let device = match &self.device {
            Some(device) => device.clone(),
            None => Device::select(self.params.device_number)?,
        };
        let samples_per_frame = self.params.profiles_per_frame * state.samples_per_profile;

        let mut encoding = EncodingOperator::setup(&device, &state, samples_per_frame)?;
        if let Some(csm) = &self.csm {
            encoding.set_csm(csm)?;
        }
        let rhs = device.alloc_zeroed(state.image_len())?;

        let mut solver = CgSolver::new(device.clone());
        solver.set_iteration_limit(self.params.number_of_iterations);
        solver.set_tolerance(self.params.cg_limit);
        solver.set_output_mode(self.params.output_mode);
        solver.reserve(state.image_len())?;

        if self.strategies.regularization.is_none() && self.params.regularization == RegularizationKind::Tikhonov {
            self.strategies.regularization = Some(Box::new(Tikhonov::new(state.image_len(), self.params.kappa)));
        }
        if let Some(reg) = &self.strategies.regularization {
            if reg.domain_len() != state.image_len() {
                return Err(ReconError::Configuration(format!(
                    "regularization acts on {} voxels, image has {}",
                    reg.domain_len(),
                    state.image_len()
                )));
            }
        }

        info!(
            slice = self.params.slice_no,
            matrix = ?state.matrix_size,
            grid = ?state.matrix_size_os,
            channels = state.channels,
            samples_per_profile = state.samples_per_profile,
            device = device.index(),
            "engine configured"
        );
        Ok(Parts {
            state,
            stager: SampleStager::new(device.clone(), state.channels, state.samples_per_profile),
            precond: Preconditioner::new(device.clone()),
            device,
            encoding,
            solver,
            rhs,
        })
    }
}

/// Everything allocated during configuration.
struct Parts {
    state: EncodingState,
    device: Device,
    stager: SampleStager,
    encoding: EncodingOperator,
    precond: Preconditioner,
    solver: CgSolver,
    rhs: DeviceArray<Complex32>,
}

pub struct ConfiguredEngine {
    params: ReconParams,
    state: EncodingState,
    device: Device,
    buffer: ProfileBuffer,
    stager: SampleStager,
    encoding: EncodingOperator,
    precond: Preconditioner,
    solver: CgSolver,
    rhs: DeviceArray<Complex32>,
    strategies: Strategies,
    trajectory: Vec<[f32; 2]>,
    dcw: Vec<f32>,
    /// profiles discarded by the buffer so far
    current_profile_offset: usize,
    current_frame_number: usize,
}

impl ConfiguredEngine {
    fn assemble(params: ReconParams, strategies: Strategies, parts: Parts) -> Self {
        let Parts { state, device, stager, encoding, precond, solver, rhs } = parts;
        Self {
            buffer: ProfileBuffer::new(params.slice_no, params.profiles_per_frame, params.shared_profiles),
            params,
            state,
            device,
            stager,
            encoding,
            precond,
            solver,
            rhs,
            strategies,
            trajectory: Vec::new(),
            dcw: Vec::new(),
            current_profile_offset: 0,
            current_frame_number: 0,
        }
    }

    /// Configuration happens once per slice. Later calls keep the existing geometry.
    pub fn configure(&mut self, scan: &ScanParams) -> EncodingState {
        if scan.matrix_size != self.state.matrix_size
            || scan.channels != self.state.channels
            || scan.readout_length != self.state.samples_per_profile
        {
            debug!(?scan, "engine already configured, ignoring new scan parameters");
        }
        self.state
    }

    pub fn state(&self) -> &EncodingState {
        &self.state
    }

    pub fn params(&self) -> &ReconParams {
        &self.params
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn buffered_profiles(&self) -> usize {
        self.buffer.len()
    }

    /// frames triggered so far, failed ones included
    pub fn frame_number(&self) -> usize {
        self.current_frame_number
    }

    pub fn profile_offset(&self) -> usize {
        self.current_profile_offset
    }

    /// Replaces the coil maps, shape `(channels, m0, m1)`.
    pub fn set_csm(&mut self, csm: &Array3<Complex32>) -> Result<()> {
        self.encoding.set_csm(csm)
    }

    pub fn process(&mut self, profile: AcquisitionProfile) -> Result<ProcessOutcome> {
        if profile.slice() != self.params.slice_no {
            if self.params.pass_on_undesired_data {
                return Ok(ProcessOutcome::Forwarded(Message::Acquisition(profile)));
            }
            debug!(slice = profile.slice(), "dropping profile of another slice");
            return Ok(ProcessOutcome::Dropped);
        }

        if profile.channels() != self.state.channels || profile.samples() != self.state.samples_per_profile {
            return Err(ReconError::Data(format!(
                "profile has {} channels x {} samples, expected {} x {}",
                profile.channels(),
                profile.samples(),
                self.state.channels,
                self.state.samples_per_profile
            )));
        }
        self.buffer.append(profile)?;
        if !self.buffer.is_ready() {
            return Ok(ProcessOutcome::Buffered);
        }

        let frame = self.current_frame_number;
        let result = self.reconstruct_frame();
        // the window moves on whether or not the frame made it
        let discarded = self.buffer.slide()?;
        self.current_profile_offset += discarded;
        self.current_frame_number += 1;

        match result {
            Ok(image) => Ok(ProcessOutcome::Reconstructed(image)),
            Err(e) => {
                warn!(frame, error = %e, "frame reconstruction failed");
                Err(ReconError::frame(frame, e))
            }
        }
    }

    fn reconstruct_frame(&mut self) -> Result<ReconImage> {
        let ppf = self.params.profiles_per_frame;
        let sp = self.state.samples_per_profile;
        let channels = self.state.channels;

        let frame = self.buffer.extract_frame()?;
        let header = *frame
            .last()
            .ok_or_else(|| ReconError::Data("empty frame".to_string()))?
            .header();

        self.strategies.trajectory.compute(self.current_profile_offset, ppf, sp, &mut self.trajectory)?;
        self.strategies.dcw.compute(&self.trajectory, sp, &mut self.dcw)?;
        if self.trajectory.len() != ppf * sp || self.dcw.len() != ppf * sp {
            return Err(ReconError::Data(format!(
                "trajectory strategy produced {} points and {} weights for {} samples",
                self.trajectory.len(),
                self.dcw.len(),
                ppf * sp
            )));
        }

        {
            let samples = self.stager.stage(&frame)?;
            self.strategies.noise.decorrelate(samples.as_mut_slice(), channels, &self.trajectory)?;
        }

        self.encoding.set_dcw(&self.dcw)?;
        let trajectory = self.stager.stage_trajectory(&self.trajectory)?;
        self.encoding.preprocess(trajectory)?;

        let samples = self.stager.samples().ok_or_else(|| ReconError::Resource("no staged samples".to_string()))?;
        let context = FrameContext {
            frame_number: self.current_frame_number,
            channels,
            samples: samples.as_slice(),
            trajectory: &self.trajectory,
            dcw: &self.dcw,
        };
        if let Some(csm) = self.strategies.csm_update.update(&context)? {
            self.encoding.set_csm(&csm)?;
        }

        let previous = self.solver.take_preconditioner();
        let weights = self.precond.update(
            self.encoding.csm(),
            channels,
            self.strategies.regularization.as_deref(),
            previous,
        )?;
        self.solver.set_preconditioner(weights);

        self.encoding.mult_mh(samples.as_slice(), self.rhs.as_mut_slice())?;

        let mut system = NormalEquations::new();
        system.add_operator(&mut self.encoding);
        if let Some(reg) = self.strategies.regularization.as_mut() {
            system.add_operator(reg.as_operator());
        }
        let report = self.solver.solve(&mut system, self.rhs.as_slice())?;

        let [m0, m1] = self.state.matrix_size;
        let data = Array2::from_shape_vec((m0, m1), self.solver.solution().to_vec())
            .map_err(|e| ReconError::Data(format!("solution does not fit the image matrix: {e}")))?;
        debug!(
            frame = self.current_frame_number,
            offset = self.current_profile_offset,
            iterations = report.iterations,
            "frame reconstructed"
        );
        let header = ImageHeader::from_acquisition(&header, self.state.matrix_size)?;
        Ok(ReconImage { header, data, report })
    }
}

enum NodeState {
    Unconfigured(Box<UnconfiguredEngine>),
    Configured(Box<ConfiguredEngine>),
    /// only observable if configuration panicked
    Poisoned,
}

/// A reconstruction node that is configured at runtime, when the scan parameters arrive.
pub struct CgSenseNode {
    state: NodeState,
}

impl CgSenseNode {
    pub fn new(engine: UnconfiguredEngine) -> Self {
        Self { state: NodeState::Unconfigured(Box::new(engine)) }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.state, NodeState::Configured(_))
    }

    pub fn engine(&self) -> Option<&ConfiguredEngine> {
        match &self.state {
            NodeState::Configured(engine) => Some(engine.as_ref()),
            _ => None,
        }
    }

    /// Configures the node on first call, later calls return the latched geometry.
    pub fn configure(&mut self, scan: &ScanParams) -> Result<EncodingState> {
        match std::mem::replace(&mut self.state, NodeState::Poisoned) {
            NodeState::Configured(mut engine) => {
                let state = engine.configure(scan);
                self.state = NodeState::Configured(engine);
                Ok(state)
            }
            NodeState::Unconfigured(engine) => match engine.configure(scan) {
                Ok(engine) => {
                    let state = *engine.state();
                    self.state = NodeState::Configured(Box::new(engine));
                    Ok(state)
                }
                Err(ConfigureError { engine, error }) => {
                    self.state = NodeState::Unconfigured(engine);
                    Err(error)
                }
            },
            NodeState::Poisoned => Err(ReconError::Configuration("node is unusable after a failed configuration".to_string())),
        }
    }

    pub fn set_csm(&mut self, csm: &Array3<Complex32>) -> Result<()> {
        match std::mem::replace(&mut self.state, NodeState::Poisoned) {
            NodeState::Configured(mut engine) => {
                let result = engine.set_csm(csm);
                self.state = NodeState::Configured(engine);
                result
            }
            NodeState::Unconfigured(engine) => {
                self.state = NodeState::Unconfigured(Box::new(engine.with_csm(csm.clone())));
                Ok(())
            }
            NodeState::Poisoned => Err(ReconError::Configuration("node is unusable after a failed configuration".to_string())),
        }
    }

    pub fn process(&mut self, message: Message) -> Result<ProcessOutcome> {
        match (&mut self.state, message) {
            (NodeState::Configured(engine), Message::Acquisition(profile)) => engine.process(profile),
            (_, Message::Acquisition(_)) => Err(ReconError::Data("profile received before configuration".to_string())),
            (_, image @ Message::Image(_)) => Ok(ProcessOutcome::Forwarded(image)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AcquisitionHeader;
    use crate::params::TrajectoryKind;
    use crate::solver::SolveStatus;
    use approx::assert_abs_diff_eq;

    fn scan(m: usize, channels: usize, readout_length: usize) -> ScanParams {
        ScanParams { readout_length, channels, matrix_size: [m, m] }
    }

    fn cartesian_params(m: usize) -> ReconParams {
        ReconParams {
            profiles_per_frame: m,
            shared_profiles: 0,
            oversampling: 2.,
            trajectory: TrajectoryKind::Cartesian,
            number_of_iterations: 10,
            ..ReconParams::default()
        }
    }

    fn empty_profile(slice: u16, channels: usize, samples: usize) -> AcquisitionProfile {
        let mut header = AcquisitionHeader::default();
        header.idx.slice = slice;
        AcquisitionProfile::new(header, Array2::zeros((channels, samples))).unwrap()
    }

    /// centered unitary DFT of a real image, sampled on the Cartesian lines of the engine
    fn cartesian_profiles(image: &Array2<Complex32>) -> Vec<AcquisitionProfile> {
        let (m0, m1) = image.dim();
        let mut profiles = Vec::with_capacity(m0);
        for p in 0..m0 {
            let k0 = (p as f32 - (m0 / 2) as f32) / m0 as f32;
            let data = Array2::from_shape_fn((1, m1), |(_, s)| {
                let k1 = (s as f32 - (m1 / 2) as f32) / m1 as f32;
                image
                    .indexed_iter()
                    .map(|((i0, i1), x)| {
                        let x0 = i0 as f32 - (m0 / 2) as f32;
                        let x1 = i1 as f32 - (m1 / 2) as f32;
                        x * Complex32::from_polar(1., -2. * std::f32::consts::PI * (k0 * x0 + k1 * x1))
                    })
                    .sum::<Complex32>()
            });
            let mut header = AcquisitionHeader::default();
            header.idx.kspace_encode_step_1 = p as u16;
            profiles.push(AcquisitionProfile::new(header, data).unwrap());
        }
        profiles
    }

    #[test]
    fn fully_sampled_cartesian_frame_recovers_image() {
        let m = 16;
        let image = Array2::from_shape_fn((m, m), |(i, j)| {
            if (4..12).contains(&i) && (6..10).contains(&j) {
                Complex32::new(1. + i as f32 * 0.1, 0.5)
            } else {
                Complex32::ZERO
            }
        });
        let mut engine = UnconfiguredEngine::new(cartesian_params(m)).unwrap().configure(&scan(m, 1, m)).unwrap();

        let mut outcome = None;
        for profile in cartesian_profiles(&image) {
            outcome = Some(engine.process(profile).unwrap());
        }
        let Some(ProcessOutcome::Reconstructed(recon)) = outcome else {
            panic!("expected an image after a full frame");
        };
        assert_ne!(recon.report.status, SolveStatus::Breakdown);
        assert!(recon.report.iterations >= 1);
        assert_eq!(recon.data.dim(), (m, m));
        // unit coils and on-grid samples give a scaled identity normal operator
        let scale = recon.data[[8, 8]] / image[[8, 8]];
        for (a, b) in recon.data.iter().zip(image.iter()) {
            assert_abs_diff_eq!((a - b * scale).norm(), 0., epsilon = 1e-2);
        }
        assert_eq!(engine.buffered_profiles(), 0);
        assert_eq!(engine.profile_offset(), m);
    }

    #[test]
    fn foreign_slices_are_forwarded_or_dropped() {
        let m = 16;
        let mut engine = UnconfiguredEngine::new(cartesian_params(m)).unwrap().configure(&scan(m, 1, m)).unwrap();
        let outcome = engine.process(empty_profile(3, 1, m)).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Forwarded(Message::Acquisition(p)) if p.slice() == 3));
        assert_eq!(engine.buffered_profiles(), 0);

        let params = ReconParams { pass_on_undesired_data: false, ..cartesian_params(m) };
        let mut engine = UnconfiguredEngine::new(params).unwrap().configure(&scan(m, 1, m)).unwrap();
        assert!(matches!(engine.process(empty_profile(3, 1, m)).unwrap(), ProcessOutcome::Dropped));
        assert!(matches!(engine.process(empty_profile(0, 1, m)).unwrap(), ProcessOutcome::Buffered));
        assert_eq!(engine.buffered_profiles(), 1);
    }

    #[test]
    fn configuration_is_latched() {
        let m = 16;
        let device = Device::with_memory_limit(0, 1 << 24).unwrap();
        let engine = UnconfiguredEngine::new(cartesian_params(m)).unwrap().with_device(device.clone());
        let mut node = CgSenseNode::new(engine);
        let first = node.configure(&scan(m, 1, m)).unwrap();
        let (free, _) = device.memory_info();
        let second = node.configure(&scan(2 * m, 4, m)).unwrap();
        assert_eq!(first, second);
        assert_eq!(device.memory_info().0, free);
        assert_eq!(node.engine().map(|e| e.state().matrix_size), Some([m, m]));
    }

    #[test]
    fn malformed_profile_never_enters_the_window() {
        let m = 16;
        let params = ReconParams { profiles_per_frame: 8, shared_profiles: 4, ..cartesian_params(m) };
        let mut engine = UnconfiguredEngine::new(params).unwrap().configure(&scan(m, 1, m)).unwrap();

        for _ in 0..6 {
            assert!(matches!(engine.process(empty_profile(0, 1, m)).unwrap(), ProcessOutcome::Buffered));
        }
        assert!(matches!(engine.process(empty_profile(0, 2, m)), Err(ReconError::Data(_))));
        assert!(matches!(engine.process(empty_profile(0, 1, m + 1)), Err(ReconError::Data(_))));
        assert_eq!(engine.buffered_profiles(), 6);

        // both frames that would have held the bad profile go through
        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.push(engine.process(empty_profile(0, 1, m)).unwrap());
        }
        let frames = outcomes.iter().filter(|o| matches!(o, ProcessOutcome::Reconstructed(_))).count();
        assert_eq!(frames, 2);
        assert_eq!(engine.frame_number(), 2);
    }

    #[test]
    fn profiles_before_configuration_are_rejected() {
        let mut node = CgSenseNode::new(UnconfiguredEngine::new(cartesian_params(16)).unwrap());
        let result = node.process(Message::Acquisition(empty_profile(0, 1, 16)));
        assert!(matches!(result, Err(ReconError::Data(_))));
        assert!(!node.is_configured());
    }

    #[test]
    fn failed_configuration_keeps_node_unconfigured() {
        let m = 16;
        let device = Device::with_memory_limit(0, 1024).unwrap();
        let engine = UnconfiguredEngine::new(cartesian_params(m)).unwrap().with_device(device);
        let mut node = CgSenseNode::new(engine);
        assert!(matches!(node.configure(&scan(m, 1, m)), Err(ReconError::Resource(_))));
        assert!(!node.is_configured());

        let bad = UnconfiguredEngine::new(cartesian_params(m)).unwrap().with_csm(Array3::zeros((2, m, m)));
        match bad.configure(&scan(m, 1, m)) {
            Err(err) => {
                assert!(matches!(err.error, ReconError::Configuration(_)));
                assert_eq!(err.engine.params().profiles_per_frame, m);
            }
            Ok(_) => panic!("coil maps with the wrong channel count were accepted"),
        }
    }

    #[test]
    fn failed_frame_still_slides_the_buffer() {
        let m = 16;
        let params = ReconParams { shared_profiles: 4, ..cartesian_params(m) };
        let device = Device::with_memory_limit(0, 1 << 24).unwrap();
        let mut engine = UnconfiguredEngine::new(params)
            .unwrap()
            .with_device(device.clone())
            .configure(&scan(m, 1, m))
            .unwrap();

        // leave no room for the staging buffers
        let (free, _) = device.memory_info();
        let hog = device.alloc_zeroed::<u8>(free).unwrap();
        let mut last = None;
        for _ in 0..m {
            last = Some(engine.process(empty_profile(0, 1, m)));
        }
        match last {
            Some(Err(ReconError::Frame { frame: 0, source })) => assert!(matches!(*source, ReconError::Resource(_))),
            other => panic!("expected a frame failure, got {:?}", other.map(|r| r.is_ok())),
        }
        assert_eq!(engine.buffered_profiles(), 4);
        assert_eq!(engine.frame_number(), 1);

        // the next frame goes through once memory is back
        drop(hog);
        let mut last = None;
        for _ in 0..m - 4 {
            last = Some(engine.process(empty_profile(0, 1, m)).unwrap());
        }
        assert!(matches!(last, Some(ProcessOutcome::Reconstructed(_))));
        assert_eq!(engine.frame_number(), 2);
    }

    #[test]
    fn tikhonov_term_is_wired_in() {
        let m = 16;
        let params = ReconParams { regularization: RegularizationKind::Tikhonov, kappa: 0.5, ..cartesian_params(m) };
        let mut engine = UnconfiguredEngine::new(params).unwrap().configure(&scan(m, 1, m)).unwrap();
        let mut image = Array2::zeros((m, m));
        image[[8, 8]] = Complex32::ONE;
        let mut recon = None;
        for profile in cartesian_profiles(&image) {
            if let ProcessOutcome::Reconstructed(r) = engine.process(profile).unwrap() {
                recon = Some(r);
            }
        }
        let recon = recon.unwrap();
        // samples are unnormalized DFT sums on a 32 point grid, so E^H y = 8 x while E^H E = I / 4
        assert_abs_diff_eq!(recon.data[[8, 8]].re, 8. / (0.25 + 0.5), epsilon = 0.05);
        assert_abs_diff_eq!(recon.data[[3, 3]].norm(), 0., epsilon = 0.05);
    }
}
