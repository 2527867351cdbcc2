use cgsense_reco::cfl::{read_cfl, write_cfl, write_image};
use cgsense_reco::sim::{coil_maps, AcquisitionSimulator, CoilModel, PointSource};
use cgsense_reco::params::TrajectoryKind;
use cgsense_reco::{CgSenseNode, Message, ProcessOutcome, ReconError, ReconParams, ScanParams, UnconfiguredEngine};
use clap::{Parser, ValueEnum};
use ndarray::{Array3, Ix3};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Coils {
    Uniform,
    Birdcage,
}

/// Streams a simulated scan through a CG-SENSE node and writes every frame as cfl.
#[derive(Debug, Parser)]
struct Args {
    /// recon parameters (toml)
    recon_params: PathBuf,
    /// scan description with an [encoding] table (toml)
    scan: PathBuf,
    /// directory receiving frame###.cfl/.hdr/.json
    output_dir: PathBuf,
    /// number of profiles to simulate
    #[arg(short, long, default_value_t = 480)]
    profiles: usize,
    /// coil model used for simulation and reconstruction
    #[arg(short, long, value_enum, default_value_t = Coils::Birdcage)]
    coils: Coils,
    /// coil maps (cfl, channels x m0 x m1) to reconstruct with instead of the simulated ones
    #[arg(long)]
    csm: Option<PathBuf>,
    /// noise standard deviation per real component
    #[arg(short, long, default_value_t = 0.)]
    noise: f32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let params = ReconParams::from_toml_file(args.recon_params.with_extension("toml"))?;
    if params.trajectory != TrajectoryKind::GoldenAngleRadial {
        return Err(ReconError::Configuration("the simulated scan is golden-angle radial".to_string()).into());
    }
    let scan = ScanParams::from_toml_file(args.scan.with_extension("toml"))?;
    fs::create_dir_all(&args.output_dir)?;

    let model = match args.coils {
        Coils::Uniform => CoilModel::Uniform,
        Coils::Birdcage => CoilModel::Birdcage,
    };
    let simulated_csm = coil_maps(model, scan.channels, scan.matrix_size);
    let [m0, m1] = scan.matrix_size;
    let mut sim = AcquisitionSimulator::new(scan, args.seed)?
        .with_slice(params.slice_no)
        .with_coils(simulated_csm.clone())?
        .with_noise(args.noise)
        .with_source(PointSource::new([0., 0.], 1.))
        .with_source(PointSource::new([(m0 / 4) as f32, -((m1 / 8) as f32)], 0.5))
        .with_source(PointSource::new([-((m0 / 5) as f32), (m1 / 3) as f32], 0.75));

    let recon_csm: Array3<_> = match &args.csm {
        Some(path) => read_cfl(path)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| ReconError::Data(format!("coil maps must be 3-D: {e}")))?,
        None => simulated_csm,
    };
    write_cfl(args.output_dir.join("csm"), &recon_csm)?;

    let mut node = CgSenseNode::new(UnconfiguredEngine::new(params)?.with_csm(recon_csm));
    node.configure(&scan)?;

    let now = Instant::now();
    let mut frames = 0;
    for _ in 0..args.profiles {
        match node.process(Message::Acquisition(sim.next_profile()?)) {
            Ok(ProcessOutcome::Reconstructed(image)) => {
                let base = args.output_dir.join(format!("frame{:03}", frames));
                write_image(&base, &image)?;
                frames += 1;
            }
            Ok(_) => {}
            Err(e @ ReconError::Frame { .. }) => warn!("{e}"),
            Err(e) => return Err(e.into()),
        }
    }
    info!(
        frames,
        secs = now.elapsed().as_secs_f32(),
        dir = %args.output_dir.display(),
        "reconstruction done"
    );
    Ok(())
}
