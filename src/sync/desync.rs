//! Sliding window of host/external position differences
//!
//! A correction is only warranted once every sample in the window exceeds the
//! threshold, so a single noisy read never moves the host cursor.

#[derive(Debug, Clone)]
pub struct DesyncWindow {
    samples: Vec<f64>,
    next: usize,
}

impl DesyncWindow {
    /// Window of `size` samples (at least one), initially all zero
    pub fn new(size: usize) -> Self {
        Self {
            samples: vec![0.0; size.max(1)],
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Record a new sample, overwriting the oldest one
    pub fn push(&mut self, difference: f64) {
        self.samples[self.next] = difference;
        self.next = (self.next + 1) % self.samples.len();
    }

    /// Every sample strictly exceeds `threshold`
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.samples.iter().all(|sample| *sample > threshold)
    }

    /// Zero every sample
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|sample| *sample = 0.0);
        self.next = 0;
    }

    /// Change the size, discarding history
    pub fn resize(&mut self, size: usize) {
        *self = Self::new(size);
    }
}
