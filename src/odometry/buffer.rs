// Bounded per-signal sample buffer
//
// One producer (sampler thread) appends, one consumer drains. Both go through
// the Mutex owned by the sampler, so a drain never sees a half-appended sample.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct SampleBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
    evicted: u64,
    overflowing: bool,
}

impl SampleBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            evicted: 0,
            overflowing: false,
        }
    }

    /// Append a sample, evicting the oldest when full.
    /// Returns true when this push started a new overflow episode.
    pub fn push(&mut self, value: f64) -> bool {
        let mut started_overflow = false;
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.evicted += 1;
            started_overflow = !self.overflowing;
            self.overflowing = true;
        }
        self.samples.push_back(value);
        started_overflow
    }

    /// Take everything appended since the last drain, oldest first
    pub fn drain(&mut self) -> Vec<f64> {
        self.overflowing = false;
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total samples dropped to the cap over the buffer's lifetime
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_in_order() {
        let mut buffer = SampleBuffer::with_capacity(8);
        buffer.push(1.0);
        buffer.push(2.0);
        buffer.push(3.0);
        assert_eq!(buffer.drain(), vec![1.0, 2.0, 3.0]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut buffer = SampleBuffer::with_capacity(3);
        assert!(!buffer.push(1.0));
        buffer.push(2.0);
        buffer.push(3.0);
        assert!(buffer.push(4.0)); // episode starts
        assert!(!buffer.push(5.0)); // same episode
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(buffer.drain(), vec![3.0, 4.0, 5.0]);

        // A drain ends the episode
        for v in 0..4 {
            buffer.push(v as f64);
        }
        assert_eq!(buffer.evicted(), 3);
        assert_eq!(buffer.len(), 3);
    }
}
