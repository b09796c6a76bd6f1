use chrono::Local;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::catalog::{PhaseTimings, TestDefinition};
use crate::error::EngineError;
use crate::scoring::{Outcome, ScoringStrategy, Trial};
use crate::service::{Ack, ResultService, Submission};
use crate::session::{Answer, Phase, Response, Session};
use crate::stimulus::{PoolSet, SessionPlan, Stimulus, StimulusGenerator};
use crate::timer::{PresentationTimer, TimerEvent, TimerHandle};

/// Drives one session from intro countdown to submitted outcome.
///
/// Time only moves through [`on_tick`](Self::on_tick); input arrives through
/// [`respond`](Self::respond). Both are called from a single event loop, so the
/// first of "response" and "respond window expired" to be processed wins.
pub struct SessionController<R = ChaCha8Rng> {
    definition: TestDefinition,
    timings: PhaseTimings,
    generator: StimulusGenerator<R>,
    strategy: Box<dyn ScoringStrategy>,
    plan: SessionPlan,
    phase: Phase,
    session: Option<Session>,
    responses: Vec<Response>,
    current: usize,
    timer: PresentationTimer,
    window: Option<TimerHandle>,
    session_timer: PresentationTimer,
    elapsed: Duration,
    presented_at: Duration,
    respond_opened_at: Duration,
    outcome: Option<Outcome>,
    ack: Option<Ack>,
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl<R: Rng> SessionController<R> {
    /// Generate the session's stimuli; fails before any service call when the
    /// pools cannot satisfy the definition
    pub fn new(
        definition: TestDefinition,
        pools: &PoolSet,
        mut generator: StimulusGenerator<R>,
    ) -> Result<Self, EngineError> {
        let plan = generator.plan_session(&definition, pools)?;
        let timings = definition.timings();
        let strategy = definition.strategy();

        Ok(Self {
            definition,
            timings,
            generator,
            strategy,
            plan,
            phase: Phase::Init,
            session: None,
            responses: Vec::new(),
            current: 0,
            timer: PresentationTimer::new(),
            window: None,
            session_timer: PresentationTimer::new(),
            elapsed: Duration::ZERO,
            presented_at: Duration::ZERO,
            respond_opened_at: Duration::ZERO,
            outcome: None,
            ack: None,
        })
    }

    /// Replace the phase windows, e.g. with user configured ones
    pub fn with_timings(mut self, timings: PhaseTimings) -> Self {
        let config = &self.definition.configuration;
        self.strategy = config.scoring_method.strategy(config, &timings);
        self.timings = timings;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    pub fn timings(&self) -> &PhaseTimings {
        &self.timings
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Stimuli that will be presented; grows for adaptive sessions
    pub fn stimuli(&self) -> &[Stimulus] {
        match &self.session {
            Some(session) => &session.stimuli,
            None => &self.plan.trials,
        }
    }

    pub fn study(&self) -> &[Stimulus] {
        &self.plan.study
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn current_stimulus(&self) -> Option<&Stimulus> {
        match self.phase {
            Phase::Presenting | Phase::Responding => self.stimuli().get(self.current),
            _ => None,
        }
    }

    /// Position of the current trial, zero based
    pub fn trial_index(&self) -> usize {
        self.current
    }

    /// True while the study set is on screen before the first trial
    pub fn is_showing_study(&self) -> bool {
        self.phase == Phase::Presenting
            && self.current == 0
            && !self.plan.study.is_empty()
            && self.presenting_for() < self.timings.study
    }

    /// Unit of the current stimulus on screen while presenting, one digit of a
    /// sequence per `present_per_unit`
    pub fn presentation_unit(&self) -> Option<usize> {
        if self.phase != Phase::Presenting || self.is_showing_study() {
            return None;
        }
        let stimulus = self.current_stimulus()?;
        let mut offset = self.presenting_for();
        if self.current == 0 && !self.plan.study.is_empty() {
            offset = offset.saturating_sub(self.timings.study);
        }
        let per_unit = self.timings.present_per_unit.as_millis();
        let unit = match per_unit {
            0 => 0,
            ms => (offset.as_millis() / ms) as usize,
        };
        Some(unit.min(stimulus.units().saturating_sub(1)))
    }

    fn presenting_for(&self) -> Duration {
        self.elapsed.saturating_sub(self.presented_at)
    }

    /// Time left in the current intro, presentation or respond window
    pub fn remaining(&self) -> Option<Duration> {
        self.timer.remaining()
    }

    pub fn session_remaining(&self) -> Option<Duration> {
        self.session_timer.remaining()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn ack(&self) -> Option<&Ack> {
        self.ack.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Open the session with the result service and start the intro countdown
    pub fn begin<S: ResultService + ?Sized>(
        &mut self,
        service: &mut S,
    ) -> Result<&Session, EngineError> {
        if self.phase != Phase::Init {
            return Err(EngineError::WrongPhase {
                phase: self.phase,
                action: "begin",
            });
        }

        let ticket = service.start_session(&self.definition.id).map_err(|err| {
            warn!(test_id = %self.definition.id, %err, "could not start session");
            EngineError::SessionStartFailed(err)
        })?;

        info!(
            session_id = %ticket.session_id,
            kind = %self.definition.kind,
            trials = self.plan.trials.len(),
            "session started"
        );

        self.session = Some(Session {
            session_id: ticket.session_id,
            test_id: self.definition.id.clone(),
            test_kind: self.definition.kind,
            study: self.plan.study.clone(),
            stimuli: self.plan.trials.clone(),
            started_at: Local::now(),
        });
        self.phase = Phase::IntroCountdown;
        self.window = Some(self.timer.start(self.timings.intro));
        if self.timings.intro.is_zero() {
            self.on_tick(Duration::ZERO);
        }

        self.session
            .as_ref()
            .ok_or(EngineError::WrongPhase {
                phase: self.phase,
                action: "begin",
            })
    }

    /// Advance the clock by `elapsed`
    pub fn on_tick(&mut self, elapsed: Duration) {
        if !matches!(
            self.phase,
            Phase::IntroCountdown | Phase::Presenting | Phase::Responding
        ) {
            trace!(phase = %self.phase, "tick ignored");
            return;
        }
        self.elapsed += elapsed;

        if let Some(TimerEvent::Expired(_)) = self.session_timer.advance(elapsed) {
            self.expire_session();
            return;
        }

        if let Some(TimerEvent::Expired(handle)) = self.timer.advance(elapsed) {
            if self.window == Some(handle) {
                self.window = None;
                self.on_window_expired();
            }
        }
    }

    /// Record the answer for `stimulus_id`.
    ///
    /// Returns `Ok(false)` when the event arrived too late or too early and was
    /// ignored.
    pub fn respond(&mut self, stimulus_id: usize, answer: Answer) -> Result<bool, EngineError> {
        match self.phase {
            Phase::Responding => {}
            Phase::Init => {
                return Err(EngineError::WrongPhase {
                    phase: self.phase,
                    action: "respond",
                })
            }
            phase => {
                debug!(%phase, stimulus_id, "response ignored");
                return Ok(false);
            }
        }

        let expected = self.current_stimulus().map(|s| s.id);
        if expected != Some(stimulus_id) {
            if self.responses.iter().any(|r| r.stimulus_ref == stimulus_id) {
                debug!(stimulus_id, "late response ignored");
                return Ok(false);
            }
            return Err(EngineError::InvalidResponse {
                expected,
                got: stimulus_id,
            });
        }

        if let Some(handle) = self.window.take() {
            self.timer.cancel(handle);
        }
        self.record(answer);
        self.next_trial();
        Ok(true)
    }

    /// Answer whatever stimulus is current
    pub fn respond_current(&mut self, answer: Answer) -> Result<bool, EngineError> {
        match self.current_stimulus().map(|s| s.id) {
            Some(id) if self.phase == Phase::Responding => self.respond(id, answer),
            _ => {
                debug!(phase = %self.phase, "response ignored");
                Ok(false)
            }
        }
    }

    /// Send the outcome to `service`.
    ///
    /// After a successful call later calls return the same ack without
    /// contacting the service. A failure keeps the outcome for another try.
    pub fn submit<S: ResultService + ?Sized>(&mut self, service: &mut S) -> Result<Ack, EngineError> {
        if let Some(ack) = &self.ack {
            return Ok(ack.clone());
        }
        let outcome = match (&self.phase, &self.outcome) {
            (Phase::Complete, Some(outcome)) => outcome,
            _ => {
                return Err(EngineError::WrongPhase {
                    phase: self.phase,
                    action: "submit",
                })
            }
        };

        match service.submit_session(&outcome.session_id, &Submission::from(outcome)) {
            Ok(ack) => {
                info!(session_id = %ack.session_id, "outcome submitted");
                self.ack = Some(ack.clone());
                Ok(ack)
            }
            Err(source) => {
                warn!(session_id = %outcome.session_id, %source, "submission failed");
                Err(EngineError::SubmissionFailed {
                    source,
                    outcome: Box::new(outcome.clone()),
                })
            }
        }
    }

    fn on_window_expired(&mut self) {
        match self.phase {
            Phase::IntroCountdown => {
                if let Some(limit) = self.timings.session_limit {
                    self.session_timer.start(limit);
                }
                self.present();
            }
            Phase::Presenting => self.open_response_window(),
            Phase::Responding => {
                debug!(trial = self.current, "respond window expired");
                self.record(Answer::Timeout);
                self.next_trial();
            }
            _ => {}
        }
    }

    fn present(&mut self) {
        let Some(stimulus) = self.stimuli().get(self.current) else {
            self.finish();
            return;
        };
        let mut window = self.timings.present_per_unit * stimulus.units() as u32;
        if self.current == 0 && !self.plan.study.is_empty() {
            window += self.timings.study;
        }

        self.phase = Phase::Presenting;
        self.presented_at = self.elapsed;
        if window.is_zero() {
            self.open_response_window();
        } else {
            self.window = Some(self.timer.start(window));
        }
    }

    fn open_response_window(&mut self) {
        self.phase = Phase::Responding;
        self.respond_opened_at = self.elapsed;
        self.window = Some(self.timer.start(self.timings.respond));
    }

    fn record(&mut self, answer: Answer) {
        let Some(stimulus) = self.stimuli().get(self.current) else {
            return;
        };
        let stimulus_ref = stimulus.id;
        let is_timeout = answer == Answer::Timeout;
        let latency = if self.phase == Phase::Responding {
            self.elapsed.saturating_sub(self.respond_opened_at)
        } else {
            Duration::ZERO
        };

        self.responses.push(Response {
            stimulus_ref,
            answer,
            timestamp_ms: millis(self.elapsed),
            latency_ms: millis(latency),
            is_timeout,
        });
    }

    fn next_trial(&mut self) {
        if let Some(span) = self.plan.adaptive {
            let last = self
                .session
                .as_ref()
                .and_then(|s| s.stimuli.get(self.current));
            let passed = match (last, self.responses.last()) {
                (Some(last), Some(response)) => {
                    self.strategy.judge(last, &response.answer) && last.units() < span.max_length
                }
                _ => false,
            };
            let extended = match last {
                Some(last) if passed => Some(self.generator.extend(last)),
                _ => None,
            };
            match extended {
                Some(Ok(next)) => {
                    if let Some(session) = self.session.as_mut() {
                        session.stimuli.push(next);
                    }
                }
                Some(Err(err)) => {
                    warn!(%err, "could not extend sequence");
                    self.finish();
                    return;
                }
                None => {
                    self.finish();
                    return;
                }
            }
        }

        self.current += 1;
        if self.current < self.stimuli().len() {
            self.present();
        } else {
            self.finish();
        }
    }

    fn expire_session(&mut self) {
        info!(
            answered = self.responses.len(),
            total = self.stimuli().len(),
            "session time limit reached"
        );
        if let Some(handle) = self.window.take() {
            self.timer.cancel(handle);
        }
        while self.current < self.stimuli().len() {
            self.record(Answer::Timeout);
            self.phase = Phase::Presenting;
            self.current += 1;
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.phase = Phase::Scoring;
        if let Some(handle) = self.window.take() {
            self.timer.cancel(handle);
        }

        let Some(session) = self.session.as_ref() else {
            return;
        };
        debug_assert_eq!(self.responses.len(), session.stimuli.len());

        let trials: Vec<Trial<'_>> = session
            .stimuli
            .iter()
            .map(|s| {
                let response = self.responses.iter().find(|r| r.stimulus_ref == s.id);
                Trial::new(s, response)
            })
            .collect();
        let outcome = self.strategy.outcome(session, &trials, self.elapsed);

        info!(
            session_id = %outcome.session_id,
            correct = outcome.correct_count,
            total = outcome.total_count,
            percentage = outcome.percentage,
            level = %outcome.level,
            "session scored"
        );
        self.outcome = Some(outcome);
        self.phase = Phase::Complete;
    }
}
