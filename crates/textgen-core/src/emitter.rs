use std::time::{Duration, Instant};

/// Refresh window used when no tokens-per-second cap is set (24 updates/s).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 24);

/// Monotonic time source, swappable in tests.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant { Instant::now() }
    fn sleep(&self, duration: Duration) { std::thread::sleep(duration) }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cadence {
    /// Forward every update, sleeping so updates are at least `1/cap` apart.
    TokensPerSecond(f64),
    /// Forward at most one update per window; drop the ones in between.
    MaxRefreshInterval(Duration),
}

impl Cadence {
    /// Caps that are not positive, or whose gap does not fit a `Duration`,
    /// fall back to the refresh window.
    pub fn from_cap(max_tokens_second: f64) -> Self {
        if max_tokens_second.is_finite() && max_tokens_second > 0.0 && min_gap(max_tokens_second).is_some() {
            Cadence::TokensPerSecond(max_tokens_second)
        } else {
            Cadence::MaxRefreshInterval(DEFAULT_REFRESH_INTERVAL)
        }
    }
}

fn min_gap(cap: f64) -> Option<Duration> { Duration::try_from_secs_f64(1.0 / cap).ok() }

/// Decides whether a freshly produced partial reply goes out now.
#[derive(Debug)]
pub struct RateLimitedEmitter<C: Clock = SystemClock> {
    cadence: Cadence,
    clock: C,
    last_update: Option<Instant>,
}

impl RateLimitedEmitter<SystemClock> {
    pub fn new(cadence: Cadence) -> Self { Self::with_clock(cadence, SystemClock) }
}

impl<C: Clock> RateLimitedEmitter<C> {
    pub fn with_clock(cadence: Cadence, clock: C) -> Self {
        Self { cadence, clock, last_update: None }
    }

    pub fn cadence(&self) -> Cadence { self.cadence }

    /// Returns `true` when the update should be forwarded. Under a
    /// tokens-per-second cap this blocks until the update is due and always
    /// returns `true`.
    pub fn ready(&mut self) -> bool {
        match self.cadence {
            Cadence::TokensPerSecond(cap) => {
                // An unrepresentable gap forwards without sleeping.
                if let (Some(last), Some(gap)) = (self.last_update, min_gap(cap)) {
                    let elapsed = self.clock.now().saturating_duration_since(last);
                    if elapsed < gap {
                        self.clock.sleep(gap - elapsed);
                    }
                }
                self.last_update = Some(self.clock.now());
                true
            }
            Cadence::MaxRefreshInterval(window) => {
                let now = self.clock.now();
                match self.last_update {
                    Some(last) if now.saturating_duration_since(last) <= window => false,
                    _ => {
                        self.last_update = Some(now);
                        true
                    }
                }
            }
        }
    }
}
