use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};

/// Time source for enrichment timestamps. Production uses the real clock;
/// tests install a fixed one so output is deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

static CLOCK: RwLock<Option<Arc<dyn Clock>>> = RwLock::new(None);
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Current time from the installed clock, or the system clock when none is
/// installed.
pub fn now() -> DateTime<Utc> {
    let installed = CLOCK.read().unwrap_or_else(PoisonError::into_inner);
    match installed.as_ref() {
        Some(clock) => clock.now(),
        None => Utc::now(),
    }
}

/// Install a clock for the lifetime of the returned guard. Dropping the guard
/// restores the previous clock on every exit path, including panics. Holders
/// of the guard are serialized, so concurrently running tests cannot observe
/// each other's clocks.
#[must_use = "dropping the guard restores the previous clock"]
pub fn install(clock: Arc<dyn Clock>) -> ClockGuard {
    let exclusive = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let previous = {
        let mut installed = CLOCK.write().unwrap_or_else(PoisonError::into_inner);
        installed.replace(clock)
    };
    ClockGuard {
        previous,
        _exclusive: exclusive,
    }
}

/// Shorthand for installing a `FixedClock`.
#[must_use = "dropping the guard restores the previous clock"]
pub fn freeze(at: DateTime<Utc>) -> ClockGuard {
    install(Arc::new(FixedClock(at)))
}

pub struct ClockGuard {
    previous: Option<Arc<dyn Clock>>,
    _exclusive: MutexGuard<'static, ()>,
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        let mut installed = CLOCK.write().unwrap_or_else(PoisonError::into_inner);
        *installed = self.previous.take();
    }
}
