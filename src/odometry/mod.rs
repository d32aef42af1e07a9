// Odometry sampling for the pose estimator
//
// Provides:
// - Signal: a named scalar telemetry channel
// - OdometrySampler: fixed-rate background polling into per-signal buffers
// - SampleHandle / drain_together: consumer-side drains

mod buffer;
mod sampler;
mod signal;

pub use buffer::SampleBuffer;
pub use sampler::{drain_together, OdometrySampler, SampleHandle, SamplerError, SignalFault, TickReport};
pub use signal::{RateTier, ReadFn, Signal, SignalError, SignalId};
