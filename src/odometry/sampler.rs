// High-rate odometry sampler
//
// A single background thread polls every registered signal at a fixed rate and
// appends the result to that signal's buffer. The main loop drains the buffers
// once per tick, so the pose estimator sees every sample taken in between, not
// just the latest snapshot.
//
// Locking: the registration list is held for a whole tick, each buffer only
// while one sample is appended or while it is drained. `drain_together` takes
// the registration lock first, so paired signals are always drained at the
// same tick boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::buffer::SampleBuffer;
use super::signal::{RateTier, ReadFn, Signal, SignalError, SignalId};
use crate::config::{ConfigError, SamplerConfig};

// Log an overrun on the first miss and then every this many consecutive misses
const OVERRUN_LOG_INTERVAL: u64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Odometry sampler was already started")]
    AlreadyStarted,

    #[error("Failed to spawn odometry sampler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A signal read that failed during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct SignalFault {
    pub id: SignalId,
    pub name: Arc<str>,
    pub error: SignalError,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub sampled: usize,
    pub faults: Vec<SignalFault>,
}

struct Registration {
    signal: Signal,
    tier: RateTier,
    buffer: Arc<Mutex<SampleBuffer>>,
    failing: bool,
}

// Clears the running flag however the sampler thread exits, panics included
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared {
    config: SamplerConfig,
    registrations: Mutex<Vec<Registration>>,
    ticks: AtomicU64,
    running: AtomicBool,
}

impl Shared {
    fn tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel);
        let poll_slow = tick % self.config.slow_divisor() == 0;
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let mut registrations = self.registrations.lock();
        for reg in registrations.iter_mut() {
            if reg.tier == RateTier::Slow && !poll_slow {
                continue;
            }

            match reg.signal.read() {
                Ok(value) => {
                    if reg.failing {
                        info!(signal = %reg.signal.name(), "Signal read recovered");
                        reg.failing = false;
                    }
                    if reg.buffer.lock().push(value) {
                        warn!(
                            signal = %reg.signal.name(),
                            cap = self.config.max_retained_samples,
                            "Sample buffer full, evicting oldest samples (consumer not draining?)"
                        );
                    }
                    report.sampled += 1;
                }
                Err(e) => {
                    if !reg.failing {
                        warn!(signal = %reg.signal.name(), "Signal read failed, skipping sample: {}", e);
                        reg.failing = true;
                    }
                    report.faults.push(SignalFault {
                        id: reg.signal.id(),
                        name: Arc::clone(reg.signal.name()),
                        error: e,
                    });
                }
            }
        }

        report
    }

    fn run(&self) {
        let _running = RunningGuard(&self.running);
        let period = self.config.period();
        info!(
            "Odometry sampler started: {}Hz fast tier, {}Hz slow tier",
            self.config.fast_hz, self.config.slow_hz
        );

        let mut deadline = Instant::now();
        let mut overruns = 0u64;

        while self.running.load(Ordering::Acquire) {
            let cycle_start = Instant::now();
            self.tick();

            deadline += period;
            let now = Instant::now();
            if deadline > now {
                overruns = 0;
                thread::sleep(deadline - now);
            } else {
                if overruns % OVERRUN_LOG_INTERVAL == 0 {
                    warn!(
                        "Odometry sampler overrun: {:?} (target: {:?})",
                        cycle_start.elapsed(),
                        period
                    );
                }
                overruns += 1;
                // Don't try to catch up on missed ticks
                deadline = now;
            }
        }

        info!("Odometry sampler stopped after {} ticks", self.ticks.load(Ordering::Acquire));
    }
}

/// Lookup-only reference to one signal's buffer.
///
/// Holds no ownership: once the sampler is dropped, drains return nothing.
#[derive(Debug, Clone)]
pub struct SampleHandle {
    id: SignalId,
    name: Arc<str>,
    tier: RateTier,
    buffer: Weak<Mutex<SampleBuffer>>,
    shared: Weak<Shared>,
}

impl SampleHandle {
    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier(&self) -> RateTier {
        self.tier
    }

    /// Everything sampled since the last drain, oldest first
    pub fn drain(&self) -> Vec<f64> {
        self.buffer
            .upgrade()
            .map(|buffer| buffer.lock().drain())
            .unwrap_or_default()
    }

    /// Samples waiting to be drained
    pub fn pending(&self) -> usize {
        self.buffer.upgrade().map(|buffer| buffer.lock().len()).unwrap_or(0)
    }

    /// Total samples lost to the retention cap
    pub fn evicted(&self) -> u64 {
        self.buffer.upgrade().map(|buffer| buffer.lock().evicted()).unwrap_or(0)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("config", &self.config)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

/// Drain several handles at the same tick boundary.
///
/// Handles must come from the same sampler. Results are in handle order.
pub fn drain_together(handles: &[&SampleHandle]) -> Vec<Vec<f64>> {
    let Some(shared) = handles.first().and_then(|h| h.shared.upgrade()) else {
        return handles.iter().map(|h| h.drain()).collect();
    };
    debug_assert!(handles.iter().all(|h| Weak::ptr_eq(&h.shared, &handles[0].shared)));

    // Holding the registration lock keeps the sampler between ticks
    let _between_ticks = shared.registrations.lock();
    handles.iter().map(|h| h.drain()).collect()
}

/// Process-wide odometry sampler.
///
/// Construct once at startup, register signals, `start` once, `stop` at
/// shutdown. Pass it by reference to whoever registers signals.
#[derive(Debug)]
pub struct OdometrySampler {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    started: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl OdometrySampler {
    /// Fails on an invalid config, before any thread exists
    pub fn new(config: SamplerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                registrations: Mutex::new(Vec::new()),
                ticks: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            next_id: AtomicU64::new(0),
            started: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.shared.config
    }

    /// Register a signal; it is polled in registration order on every tick of its tier.
    ///
    /// Safe while running: registration waits for the current tick to finish.
    pub fn register(
        &self,
        name: impl Into<Arc<str>>,
        tier: RateTier,
        loggable: bool,
        read: ReadFn,
    ) -> SampleHandle {
        let id = SignalId(self.next_id.fetch_add(1, Ordering::Relaxed) as u32);
        let signal = Signal::new(id, name, read).with_loggable(loggable);
        let buffer = Arc::new(Mutex::new(SampleBuffer::with_capacity(
            self.shared.config.max_retained_samples,
        )));

        let handle = SampleHandle {
            id,
            name: Arc::clone(signal.name()),
            tier,
            buffer: Arc::downgrade(&buffer),
            shared: Arc::downgrade(&self.shared),
        };

        debug!("Registered odometry signal {} {} ({:?} tier)", id, signal.name(), tier);
        self.shared.registrations.lock().push(Registration {
            signal,
            tier,
            buffer,
            failing: false,
        });

        handle
    }

    /// Poll every due signal once. The background thread calls this; tests may too.
    pub fn tick(&self) -> TickReport {
        self.shared.tick()
    }

    pub fn drain(&self, handle: &SampleHandle) -> Vec<f64> {
        handle.drain()
    }

    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    pub fn signal_count(&self) -> usize {
        self.shared.registrations.lock().len()
    }

    /// (id, name) of every signal flagged for logging
    pub fn loggable_signals(&self) -> Vec<(SignalId, Arc<str>)> {
        self.shared
            .registrations
            .lock()
            .iter()
            .filter(|reg| reg.signal.loggable())
            .map(|reg| (reg.signal.id(), Arc::clone(reg.signal.name())))
            .collect()
    }

    /// Spawn the sampling thread. May only be called once.
    pub fn start(&self) -> Result<(), SamplerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SamplerError::AlreadyStarted);
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("odometry-sampler".to_string())
            .spawn(move || shared.run())
            .inspect_err(|_| self.shared.running.store(false, Ordering::Release))?;

        *self.thread.lock() = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop and join the sampling thread. Idempotent.
    ///
    /// The thread only exits between ticks, so no buffer is left mid-append.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Odometry sampler thread panicked");
            }
        }
    }
}

impl Drop for OdometrySampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareError;
    use std::time::Duration;

    fn counter(start: f64) -> ReadFn {
        let mut next = start;
        Box::new(move || -> Result<f64, SignalError> {
            let value = next;
            next += 1.0;
            Ok(value)
        })
    }

    fn sampler() -> OdometrySampler {
        OdometrySampler::new(SamplerConfig::default()).unwrap()
    }

    #[test]
    fn test_n_ticks_yield_n_ordered_samples() {
        let sampler = sampler();
        let handle = sampler.register("counter", RateTier::Fast, true, counter(0.0));

        for _ in 0..25 {
            sampler.tick();
        }

        let samples = sampler.drain(&handle);
        assert_eq!(samples.len(), 25);
        assert!(samples.windows(2).all(|w| w[0] < w[1]));

        // Nothing new until the next tick
        assert!(sampler.drain(&handle).is_empty());
    }

    #[test]
    fn test_three_ticks_drain_one_two_three() {
        let sampler = sampler();
        let handle = sampler.register("s", RateTier::Fast, true, counter(1.0));

        sampler.tick();
        sampler.tick();
        sampler.tick();

        assert_eq!(handle.drain(), vec![1.0, 2.0, 3.0]);
        assert_eq!(handle.pending(), 0);
    }

    #[test]
    fn test_slow_tier_polled_every_divisor_ticks() {
        let sampler = sampler(); // 200 Hz / 50 Hz
        let fast = sampler.register("fast", RateTier::Fast, true, counter(0.0));
        let slow = sampler.register("slow", RateTier::Slow, true, counter(0.0));

        for _ in 0..8 {
            sampler.tick();
        }

        assert_eq!(fast.drain().len(), 8);
        assert_eq!(slow.drain(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_faulting_signal_does_not_stop_others() {
        let sampler = sampler();
        let good = sampler.register("good", RateTier::Fast, true, counter(0.0));

        let mut calls = 0;
        let flaky = sampler.register(
            "flaky",
            RateTier::Fast,
            true,
            Box::new(move || -> Result<f64, SignalError> {
                calls += 1;
                if calls == 2 {
                    Err(HardwareError::Disconnected {
                        device: "flaky".to_string(),
                    }
                    .into())
                } else {
                    Ok(calls as f64)
                }
            }),
        );

        let first = sampler.tick();
        let second = sampler.tick();
        let third = sampler.tick();

        assert!(first.faults.is_empty());
        assert_eq!(second.faults.len(), 1);
        assert_eq!(second.faults[0].id, flaky.id());
        assert_eq!(second.sampled, 1);
        assert!(third.faults.is_empty());

        assert_eq!(good.drain(), vec![0.0, 1.0, 2.0]);
        assert_eq!(flaky.drain(), vec![1.0, 3.0]);
    }

    #[test]
    fn test_stalled_consumer_is_capped() {
        let sampler = OdometrySampler::new(SamplerConfig {
            max_retained_samples: 4,
            ..SamplerConfig::default()
        })
        .unwrap();
        let handle = sampler.register("s", RateTier::Fast, true, counter(0.0));

        for _ in 0..10 {
            sampler.tick();
        }

        assert_eq!(handle.evicted(), 6);
        assert_eq!(handle.drain(), vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_drain_together_returns_equal_lengths() {
        let sampler = sampler();
        let a = sampler.register("a", RateTier::Fast, true, counter(0.0));
        let b = sampler.register("b", RateTier::Fast, true, counter(100.0));

        for _ in 0..5 {
            sampler.tick();
        }

        let drained = drain_together(&[&a, &b]);
        assert_eq!(drained[0], vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(drained[1], vec![100.0, 101.0, 102.0, 103.0, 104.0]);
    }

    #[test]
    fn test_handle_outlives_sampler() {
        let sampler = sampler();
        let handle = sampler.register("s", RateTier::Fast, true, counter(0.0));
        sampler.tick();
        drop(sampler);

        assert!(handle.drain().is_empty());
        assert!(drain_together(&[&handle])[0].is_empty());
    }

    #[test]
    fn test_loggable_signals_listed() {
        let sampler = sampler();
        let logged = sampler.register("logged", RateTier::Fast, true, counter(0.0));
        sampler.register("quiet", RateTier::Slow, false, counter(0.0));

        let signals = sampler.loggable_signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].0, logged.id());
        assert_eq!(sampler.signal_count(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = OdometrySampler::new(SamplerConfig {
            fast_hz: 0.0,
            ..SamplerConfig::default()
        });
        match result {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "fast_hz"),
            other => panic!("expected invalid fast_hz, got {:?}", other),
        }
    }

    #[test]
    fn test_panicking_thread_clears_running() {
        let sampler = sampler();
        sampler.register(
            "broken",
            RateTier::Fast,
            false,
            Box::new(|| -> Result<f64, SignalError> { panic!("driver bug") }),
        );

        sampler.start().unwrap();
        for _ in 0..50 {
            if !sampler.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!sampler.is_running());
        sampler.stop();
    }

    #[test]
    fn test_thread_lifecycle() {
        let sampler = sampler();
        let a = sampler.register("a", RateTier::Fast, true, counter(0.0));
        let b = sampler.register("b", RateTier::Fast, true, counter(0.0));

        sampler.start().unwrap();
        assert!(sampler.is_running());
        assert!(matches!(sampler.start(), Err(SamplerError::AlreadyStarted)));

        let mut collected = Vec::new();
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(20));
            let drained = drain_together(&[&a, &b]);
            assert_eq!(drained[0].len(), drained[1].len());
            collected.extend(drained[0].iter().copied());
        }

        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());

        // Leftovers from the last ticks, then nothing moves
        collected.extend(a.drain());
        let ticks = sampler.ticks();
        assert_eq!(collected.len() as u64, ticks);
        assert!(collected.windows(2).all(|w| w[1] == w[0] + 1.0));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sampler.ticks(), ticks);
        assert!(a.drain().is_empty());
    }
}
