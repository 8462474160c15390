//! Enrollment descriptor averaging.
//!
//! Several live samples of the same face are averaged component-wise into one
//! enrollment descriptor, which smooths out pose and lighting noise.

use crate::types::{Descriptor, ValidationError, DESCRIPTOR_LEN};

/// Minimum number of samples captured at registration.
pub const DEFAULT_MIN_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    pub min_samples: usize,
    pub dimension: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            dimension: DESCRIPTOR_LEN,
        }
    }
}

impl Aggregator {
    pub fn new(min_samples: usize, dimension: usize) -> Self {
        Self { min_samples, dimension }
    }

    /// Average all `samples` component-wise.
    ///
    /// Every sample must have exactly `dimension` finite components and there
    /// must be at least `min_samples` of them.
    pub fn average(&self, samples: &[Descriptor]) -> Result<Descriptor, ValidationError> {
        let required = self.min_samples.max(1);
        if samples.len() < required {
            return Err(ValidationError::TooFewSamples {
                required,
                actual: samples.len(),
            });
        }

        let mut sums = vec![0.0f64; self.dimension];
        for sample in samples {
            sample.validate(self.dimension)?;
            for (acc, v) in sums.iter_mut().zip(sample.values.iter()) {
                *acc += f64::from(*v);
            }
        }

        let count = samples.len() as f64;
        let values = sums.into_iter().map(|s| (s / count) as f32).collect();

        tracing::debug!(samples = samples.len(), dimension = self.dimension, "averaged descriptors");
        Ok(Descriptor::new(values))
    }
}
