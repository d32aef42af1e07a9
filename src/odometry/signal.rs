// Named scalar telemetry channels polled by the sampler

use std::fmt;
use std::sync::Arc;

use crate::hardware::HardwareError;

/// Zero-argument scalar producer, called from the sampler thread
pub type ReadFn = Box<dyn FnMut() -> Result<f64, SignalError> + Send>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("Signal {name} produced a non-finite value: {value}")]
    NonFinite { name: String, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(pub u32);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Polling rate a signal is registered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTier {
    /// Every `slow_divisor` sampler ticks
    Slow,
    /// Every sampler tick
    Fast,
}

pub struct Signal {
    id: SignalId,
    name: Arc<str>,
    loggable: bool,
    read: ReadFn,
}

impl Signal {
    pub fn new(id: SignalId, name: impl Into<Arc<str>>, read: ReadFn) -> Self {
        Self {
            id,
            name: name.into(),
            loggable: true,
            read,
        }
    }

    pub fn with_loggable(mut self, loggable: bool) -> Self {
        self.loggable = loggable;
        self
    }

    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn loggable(&self) -> bool {
        self.loggable
    }

    /// Read once; NaN and infinities count as read faults
    pub fn read(&mut self) -> Result<f64, SignalError> {
        let value = (self.read)()?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(SignalError::NonFinite {
                name: self.name.to_string(),
                value,
            })
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("loggable", &self.loggable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_read_is_a_fault() {
        let mut signal = Signal::new(SignalId(0), "bad", Box::new(|| Ok::<_, SignalError>(f64::NAN)));
        assert!(matches!(signal.read(), Err(SignalError::NonFinite { .. })));
    }

    #[test]
    fn test_read_passes_value_through() {
        let mut signal = Signal::new(SignalId(1), "good", Box::new(|| Ok::<_, SignalError>(1.5))).with_loggable(false);
        assert_eq!(signal.read().unwrap(), 1.5);
        assert!(!signal.loggable());
    }
}
