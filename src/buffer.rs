use crate::error::{ReconError, Result};
use crate::message::AcquisitionProfile;
use std::collections::VecDeque;

/// Sliding window of profiles for one slice. Consecutive frames share `shared_profiles` profiles.
#[derive(Debug)]
pub struct ProfileBuffer {
    slice_no: u16,
    profiles_per_frame: usize,
    shared_profiles: usize,
    profiles: VecDeque<AcquisitionProfile>,
}

impl ProfileBuffer {
    pub fn new(slice_no: u16, profiles_per_frame: usize, shared_profiles: usize) -> Self {
        assert!(shared_profiles < profiles_per_frame, "shared profiles must be less than profiles per frame");
        Self {
            slice_no,
            profiles_per_frame,
            shared_profiles,
            profiles: VecDeque::with_capacity(profiles_per_frame),
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profiles_per_frame(&self) -> usize {
        self.profiles_per_frame
    }

    /// number of profiles dropped by each [ProfileBuffer::slide]
    pub fn advance(&self) -> usize {
        self.profiles_per_frame - self.shared_profiles
    }

    pub fn append(&mut self, profile: AcquisitionProfile) -> Result<()> {
        if profile.slice() != self.slice_no {
            return Err(ReconError::Data(format!(
                "profile of slice {} offered to the buffer of slice {}",
                profile.slice(),
                self.slice_no
            )));
        }
        self.profiles.push_back(profile);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.profiles.len() >= self.profiles_per_frame
    }

    /// the most recent `profiles_per_frame` profiles, oldest first
    pub fn extract_frame(&self) -> Result<Vec<&AcquisitionProfile>> {
        if !self.is_ready() {
            return Err(ReconError::Data(format!(
                "frame needs {} profiles, buffer holds {}",
                self.profiles_per_frame,
                self.profiles.len()
            )));
        }
        let first = self.profiles.len() - self.profiles_per_frame;
        Ok(self.profiles.range(first..).collect())
    }

    /// Discards the profiles that are not shared with the next frame. Returns how many were dropped.
    pub fn slide(&mut self) -> Result<usize> {
        let n = self.advance();
        if self.profiles.len() < n {
            return Err(ReconError::Data(format!(
                "cannot slide {n} profiles out of a buffer holding {}",
                self.profiles.len()
            )));
        }
        self.profiles.drain(..n);
        Ok(n)
    }
}
