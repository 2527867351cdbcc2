// Messages flowing into and out of a reconstruction node

use crate::error::{ReconError, Result};
use crate::solver::SolveReport;
use ndarray::Array2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// encoding counters of a profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingIndex {
    pub kspace_encode_step_1: u16,
    pub slice: u16,
    pub phase: u16,
    pub repetition: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionHeader {
    pub idx: EncodingIndex,
    /// frame boundary markers
    pub min_idx: EncodingIndex,
    pub max_idx: EncodingIndex,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
}

/// One k-space readout for all channels. Sample data is channel-major: `data[[channel, sample]]`.
#[derive(Debug, Clone)]
pub struct AcquisitionProfile {
    header: AcquisitionHeader,
    data: Array2<Complex32>,
}

impl AcquisitionProfile {
    pub fn new(header: AcquisitionHeader, data: Array2<Complex32>) -> Result<Self> {
        if data.is_empty() {
            return Err(ReconError::Data("profile carries no samples".to_string()));
        }
        let data = if data.is_standard_layout() { data } else { data.as_standard_layout().to_owned() };
        Ok(Self { header, data })
    }

    pub fn header(&self) -> &AcquisitionHeader {
        &self.header
    }

    pub fn slice(&self) -> u16 {
        self.header.idx.slice
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn samples(&self) -> usize {
        self.data.dim().1
    }

    pub fn data(&self) -> &Array2<Complex32> {
        &self.data
    }

    /// samples of one channel
    pub fn channel(&self, channel: usize) -> &[Complex32] {
        let n = self.samples();
        // standard layout is enforced in the constructor
        &self.data.as_slice().unwrap_or(&[])[channel * n..(channel + 1) * n]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub matrix_size: [u16; 3],
    pub channels: u16,
    pub data_idx_min: EncodingIndex,
    pub data_idx_max: EncodingIndex,
    pub data_idx_current: EncodingIndex,
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
}

impl ImageHeader {
    /// combined-coil image header carrying the pose and index range of `acq`
    pub fn from_acquisition(acq: &AcquisitionHeader, matrix_size: [usize; 2]) -> Result<Self> {
        let [m0, m1] = matrix_size.map(|m| {
            u16::try_from(m).map_err(|_| ReconError::Configuration(format!("matrix size {m} does not fit an image header")))
        });
        Ok(Self {
            matrix_size: [m0?, m1?, 1],
            channels: 1,
            data_idx_min: acq.min_idx,
            data_idx_max: acq.max_idx,
            data_idx_current: acq.idx,
            position: acq.position,
            quaternion: acq.quaternion,
        })
    }
}

/// A reconstructed frame. `data` has shape `(matrix_size[0], matrix_size[1])` in row-major order.
#[derive(Debug, Clone)]
pub struct ReconImage {
    pub header: ImageHeader,
    pub data: Array2<Complex32>,
    pub report: SolveReport,
}

/// Envelope for everything a node exchanges with its neighbours in the chain.
#[derive(Debug, Clone)]
pub enum Message {
    Acquisition(AcquisitionProfile),
    Image(ReconImage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ShapeBuilder;

    #[test]
    fn channel_views_are_contiguous() {
        let data = Array2::from_shape_fn((3, 4), |(c, s)| Complex32::new(c as f32, s as f32));
        let profile = AcquisitionProfile::new(AcquisitionHeader::default(), data).unwrap();
        assert_eq!(profile.channels(), 3);
        assert_eq!(profile.samples(), 4);
        assert_eq!(profile.channel(2)[3], Complex32::new(2., 3.));
    }

    #[test]
    fn fortran_layout_is_normalized() {
        let data = Array2::from_shape_fn((2, 5).f(), |(c, s)| Complex32::new(c as f32, s as f32));
        let profile = AcquisitionProfile::new(AcquisitionHeader::default(), data).unwrap();
        assert_eq!(profile.channel(1)[4], Complex32::new(1., 4.));
    }

    #[test]
    fn empty_profiles_are_rejected() {
        let data = Array2::<Complex32>::zeros((0, 16));
        assert!(AcquisitionProfile::new(AcquisitionHeader::default(), data).is_err());
    }

    #[test]
    fn image_header_copies_pose() {
        let mut acq = AcquisitionHeader::default();
        acq.position = [1., 2., 3.];
        acq.quaternion = [0., 0., 0., 1.];
        acq.min_idx.kspace_encode_step_1 = 4;
        acq.max_idx.kspace_encode_step_1 = 51;
        let header = ImageHeader::from_acquisition(&acq, [128, 96]).unwrap();
        assert_eq!(header.matrix_size, [128, 96, 1]);
        assert_eq!(header.channels, 1);
        assert_eq!(header.position, acq.position);
        assert_eq!(header.quaternion, acq.quaternion);
        assert_eq!(header.data_idx_max.kspace_encode_step_1, 51);

        assert!(matches!(
            ImageHeader::from_acquisition(&acq, [65_536, 96]),
            Err(ReconError::Configuration(_))
        ));
    }
}
