//! Fixed-length mono sample blocks
//!
//! A [`SampleBlock`] is the unit the feed delivers and the unit the output
//! device plays. Blocks are validated on construction and immutable after
//! that; the storage is reference counted so the scheduler's silence block
//! can be handed to any number of slots without copying.

use std::sync::Arc;

use crate::error::BlockError;

/// Immutable block of `f32` samples in `[-1.0, 1.0]`
#[derive(Clone, Debug)]
pub struct SampleBlock {
    samples: Arc<[f32]>,
    silent: bool,
}

impl SampleBlock {
    /// Validate `samples` against the session block length.
    ///
    /// Rejects blocks of the wrong length and blocks carrying NaN or
    /// infinite samples. Finite values outside `[-1.0, 1.0]` are clamped.
    pub fn from_samples(samples: Vec<f32>, block_length: usize) -> Result<Self, BlockError> {
        if samples.len() != block_length {
            return Err(BlockError::WrongLength {
                expected: block_length,
                got: samples.len(),
            });
        }

        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(BlockError::NonFinite(index));
        }

        let samples: Vec<f32> = samples.into_iter().map(|s| s.clamp(-1.0, 1.0)).collect();

        Ok(Self {
            samples: samples.into(),
            silent: false,
        })
    }

    /// All-zero block of `block_length` samples
    pub fn silence(block_length: usize) -> Self {
        Self {
            samples: vec![0.0; block_length].into(),
            silent: true,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// True for blocks produced by [`SampleBlock::silence`]
    pub fn is_silence(&self) -> bool {
        self.silent
    }

    /// Whether two handles share the same storage
    pub fn ptr_eq(&self, other: &SampleBlock) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Duration in microseconds at `sample_rate`
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.len() as u64 * 1_000_000) / sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_length() {
        let err = SampleBlock::from_samples(vec![0.1; 1000], 1024).unwrap_err();
        assert_eq!(err, BlockError::WrongLength { expected: 1024, got: 1000 });
    }

    #[test]
    fn test_rejects_nan() {
        let mut samples = vec![0.0; 8];
        samples[5] = f32::NAN;
        assert_eq!(
            SampleBlock::from_samples(samples, 8).unwrap_err(),
            BlockError::NonFinite(5)
        );
    }

    #[test]
    fn test_clamps_out_of_range() {
        let block = SampleBlock::from_samples(vec![1.5, -2.0, 0.25, 0.0], 4).unwrap();
        assert_eq!(block.samples(), &[1.0, -1.0, 0.25, 0.0]);
        assert!(!block.is_silence());
    }

    #[test]
    fn test_silence() {
        let silence = SampleBlock::silence(1024);
        assert_eq!(silence.len(), 1024);
        assert!(silence.samples().iter().all(|&s| s == 0.0));
        assert!(silence.is_silence());

        let shared = silence.clone();
        assert!(shared.ptr_eq(&silence));
        assert_eq!(silence.duration_us(32_000), 32_000);
    }
}
