use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyEvent};
use rand::Rng;

use crate::controller::SessionController;
use crate::error::EngineError;
use crate::session::{Answer, Phase};

/// Reference tick of the presentation countdowns
pub const DEFAULT_TICK_MS: u64 = 20;

/// Unified event type consumed by the session loop
#[derive(Clone, Debug)]
pub enum EngineEvent {
    Key(KeyEvent),
    /// An answer for the current stimulus, already decoded
    Answer(Answer),
    Resize,
    Tick,
}

/// Source of session events (keyboard, resize, decoded answers)
pub trait EventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    /// Returns Ok(event) if an event arrives before the timeout, or Err(Timeout) if it expires.
    fn recv_timeout(&self, timeout: Duration) -> Result<EngineEvent, RecvTimeoutError>;
}

/// Production event source using crossterm
pub struct CrosstermEventSource {
    rx: Receiver<EngineEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || loop {
            let sent = match event::read() {
                Ok(CtEvent::Key(key)) => tx.send(EngineEvent::Key(key)),
                Ok(CtEvent::Resize(_, _)) => tx.send(EngineEvent::Resize),
                Ok(_) => Ok(()),
                Err(_) => break,
            };
            if sent.is_err() {
                break;
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<EngineEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Configurable ticker interface
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

/// Fixed interval ticker
#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedTicker {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_TICK_MS))
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Channel backed event source for headless runs and tests
pub struct TestEventSource {
    rx: Receiver<EngineEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<EngineEvent>) -> Self {
        Self { rx }
    }
}

impl EventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<EngineEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Runner that advances the session one event/tick at a time
pub struct Runner<E: EventSource, T: Ticker> {
    event_source: E,
    ticker: T,
}

impl<E: EventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        Self {
            event_source,
            ticker,
        }
    }

    pub fn interval(&self) -> Duration {
        self.ticker.interval()
    }

    /// Blocks up to tick interval and returns the next event, or Tick on timeout
    pub fn step(&self) -> EngineEvent {
        match self.event_source.recv_timeout(self.ticker.interval()) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                EngineEvent::Tick
            }
        }
    }

    /// Run `controller` headlessly until it completes or `max_steps` run out.
    ///
    /// The event source is only read while the controller waits for a
    /// response, so queued answers are delivered one per trial; every other
    /// step advances the clock by one ticker interval. Keys and resizes are
    /// ignored.
    pub fn drive<R: Rng>(
        &self,
        controller: &mut SessionController<R>,
        max_steps: usize,
    ) -> Result<usize, EngineError> {
        for step in 0..max_steps {
            if controller.is_complete() {
                return Ok(step);
            }
            let event = if controller.phase() == Phase::Responding {
                self.step()
            } else {
                EngineEvent::Tick
            };
            match event {
                EngineEvent::Tick => controller.on_tick(self.ticker.interval()),
                EngineEvent::Answer(answer) => {
                    controller.respond_current(answer)?;
                }
                EngineEvent::Key(_) | EngineEvent::Resize => {}
            }
        }
        Ok(max_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, PhaseTimings, TestKind};
    use crate::service::MemoryResultService;
    use crate::stimulus::{PoolSet, StimulusGenerator};

    fn runner(rx: Receiver<EngineEvent>, millis: u64) -> Runner<TestEventSource, FixedTicker> {
        Runner::new(
            TestEventSource::new(rx),
            FixedTicker::new(Duration::from_millis(millis)),
        )
    }

    #[test]
    fn idle_source_yields_ticks() {
        let (_tx, rx) = mpsc::channel();
        assert!(matches!(runner(rx, 1).step(), EngineEvent::Tick));

        let (tx, rx) = mpsc::channel::<EngineEvent>();
        drop(tx);
        assert!(matches!(runner(rx, 1).step(), EngineEvent::Tick));
    }

    #[test]
    fn queued_answer_comes_first() {
        let (tx, rx) = mpsc::channel();
        tx.send(EngineEvent::Answer(Answer::Digits(vec![1, 2]))).unwrap();
        match runner(rx, 10).step() {
            EngineEvent::Answer(Answer::Digits(d)) => assert_eq!(d, vec![1, 2]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn default_ticker_is_twenty_millis() {
        assert_eq!(FixedTicker::default().interval(), Duration::from_millis(20));
    }

    #[test]
    fn answers_wait_for_the_response_window() {
        let definition = Catalog::builtin().by_kind(TestKind::Stroop).unwrap().clone();
        let timings = PhaseTimings {
            intro: Duration::from_millis(100),
            ..definition.timings()
        };
        let pools = PoolSet::builtin().unwrap();
        let mut controller =
            SessionController::new(definition, &pools, StimulusGenerator::seeded(1))
                .unwrap()
                .with_timings(timings);
        controller.begin(&mut MemoryResultService::new()).unwrap();

        let (tx, rx) = mpsc::channel();
        tx.send(EngineEvent::Answer(Answer::No)).unwrap();
        let runner = runner(rx, 20);

        // five ticks of intro, then the queued answer lands on the first trial
        assert_eq!(runner.drive(&mut controller, 6).unwrap(), 6);
        assert_eq!(controller.phase(), Phase::Responding);
        assert_eq!(controller.trial_index(), 1);
        assert_eq!(controller.responses()[0].answer, Answer::No);
        assert!(!controller.responses()[0].is_timeout);
    }
}
