use thiserror::Error;

/// Failure taxonomy of the reconstruction node.
///
/// Solver non-convergence is not an error. It still yields an image and shows up in
/// [crate::solver::SolveReport].
#[derive(Error, Debug)]
pub enum ReconError {
    /// malformed or missing scan parameters, coil map dimension mismatch. The engine stays
    /// unconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// host or device allocation failure
    #[error("resource error: {0}")]
    Resource(String),

    /// bad input data: profile before configuration, trajectory length mismatch, etc.
    #[error("data error: {0}")]
    Data(String),

    /// reading or writing files outside the streaming path
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// a frame could not be reconstructed. The engine remains configured and the buffer has
    /// already slid past the offending profiles.
    #[error("frame {frame} failed: {source}")]
    Frame {
        frame: usize,
        #[source]
        source: Box<ReconError>,
    },
}

impl ReconError {
    pub(crate) fn frame(frame: usize, source: ReconError) -> Self {
        ReconError::Frame { frame, source: Box::new(source) }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
