use std::fmt;
use std::time::Duration;

use tracing::debug;

/// Identifies one `start` of a [`PresentationTimer`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Tick {
        handle: TimerHandle,
        remaining: Duration,
    },
    Expired(TimerHandle),
}

type TickCallback = Box<dyn FnMut(TimerHandle, Duration) + Send>;
type ExpireCallback = Box<dyn FnMut(TimerHandle) + Send>;

#[derive(Debug)]
struct Countdown {
    handle: TimerHandle,
    duration: Duration,
    elapsed: Duration,
}

/// Countdown driven by elapsed time fed from the runtime.
///
/// Only one countdown runs at a time; starting a new one replaces the old one,
/// whose handle then never fires. Expiry is reported exactly once, on the first
/// `advance` that brings the elapsed time to or past the duration.
#[derive(Default)]
pub struct PresentationTimer {
    generation: u64,
    active: Option<Countdown>,
    on_tick: Option<TickCallback>,
    on_expire: Option<ExpireCallback>,
}

impl fmt::Debug for PresentationTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentationTimer")
            .field("generation", &self.generation)
            .field("active", &self.active)
            .finish()
    }
}

impl PresentationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, duration: Duration) -> TimerHandle {
        self.generation += 1;
        let handle = TimerHandle(self.generation);
        self.active = Some(Countdown {
            handle,
            duration,
            elapsed: Duration::ZERO,
        });
        handle
    }

    /// Stop the countdown started with `handle`; returns false for stale handles
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match &self.active {
            Some(c) if c.handle == handle => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    pub fn on_tick(&mut self, callback: impl FnMut(TimerHandle, Duration) + Send + 'static) {
        self.on_tick = Some(Box::new(callback));
    }

    pub fn on_expire(&mut self, callback: impl FnMut(TimerHandle) + Send + 'static) {
        self.on_expire = Some(Box::new(callback));
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.active
            .as_ref()
            .map(|c| c.duration.saturating_sub(c.elapsed))
    }

    /// Feed `elapsed` time into the running countdown
    pub fn advance(&mut self, elapsed: Duration) -> Option<TimerEvent> {
        let countdown = self.active.as_mut()?;
        countdown.elapsed += elapsed;
        let handle = countdown.handle;

        if countdown.elapsed >= countdown.duration {
            debug!(?handle, duration = ?countdown.duration, "timer expired");
            self.active = None;
            if let Some(cb) = self.on_expire.as_mut() {
                cb(handle);
            }
            Some(TimerEvent::Expired(handle))
        } else {
            let remaining = countdown.duration - countdown.elapsed;
            if let Some(cb) = self.on_tick.as_mut() {
                cb(handle, remaining);
            }
            Some(TimerEvent::Tick { handle, remaining })
        }
    }
}
