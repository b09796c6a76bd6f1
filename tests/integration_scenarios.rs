use std::collections::BTreeMap;
use std::time::Duration;

use assert_matches::assert_matches;

use cognit::catalog::{Catalog, PhaseTimings, TestDefinition, TestKind};
use cognit::config::Config;
use cognit::scoring::expected_answer;
use cognit::service::{MemoryResultService, ServiceError};
use cognit::session::{Answer, Phase};
use cognit::stimulus::{PoolSet, Stimulus, StimulusGenerator};
use cognit::{EngineError, Level, SessionController};

const STEP: Duration = Duration::from_millis(50);

fn definition(kind: TestKind) -> TestDefinition {
    Catalog::builtin().by_kind(kind).unwrap().clone()
}

fn start(definition: TestDefinition, seed: u64, service: &mut MemoryResultService) -> SessionController {
    let timings = PhaseTimings {
        intro: Duration::ZERO,
        ..definition.timings()
    };
    let pools = PoolSet::builtin().unwrap();
    let mut controller = SessionController::new(definition, &pools, StimulusGenerator::seeded(seed))
        .unwrap()
        .with_timings(timings);
    controller.begin(service).unwrap();
    controller
}

/// Tick through presentation windows and answer every trial with `answer`
fn run_to_end<F>(controller: &mut SessionController, mut answer: F)
where
    F: FnMut(usize, &Stimulus) -> Answer,
{
    for _ in 0..100_000 {
        if controller.is_complete() {
            return;
        }
        if controller.phase() == Phase::Responding {
            let trial = controller.trial_index();
            let stimulus = controller.current_stimulus().unwrap().clone();
            assert!(controller.respond(stimulus.id, answer(trial, &stimulus)).unwrap());
        } else {
            controller.on_tick(STEP);
        }
    }
    panic!("session did not complete");
}

fn wrong(stimulus: &Stimulus) -> Answer {
    match expected_answer(stimulus) {
        Answer::Yes => Answer::No,
        Answer::No => Answer::Yes,
        Answer::Digits(mut digits) => {
            digits.reverse();
            digits.push(0);
            Answer::Digits(digits)
        }
        Answer::Number(n) => Answer::Number(n + 1.0),
        Answer::Choice(_) => Answer::Choice("?".into()),
        Answer::Timeout => Answer::Timeout,
    }
}

#[test]
fn visual_memory_seven_of_ten() {
    let mut def = definition(TestKind::VisualMemory);
    def.configuration.probe_count = Some(10);
    let mut service = MemoryResultService::new();
    let mut controller = start(def, 11, &mut service);

    assert_eq!(controller.study().len(), 10);
    assert_eq!(controller.stimuli().len(), 10);
    let targets = controller.stimuli().iter().filter(|s| s.target).count();
    assert_eq!(targets, 5);

    run_to_end(&mut controller, |trial, s| {
        if trial < 7 {
            expected_answer(s)
        } else {
            wrong(s)
        }
    });

    let outcome = controller.outcome().unwrap();
    assert_eq!(outcome.correct_count, 7);
    assert_eq!(outcome.total_count, 10);
    assert_eq!(outcome.percentage, 70);
    assert_eq!(outcome.level, Level::Medium);
}

#[test]
fn digit_span_fails_at_six() {
    let mut service = MemoryResultService::new();
    let mut controller = start(definition(TestKind::DigitSpan), 5, &mut service);

    run_to_end(&mut controller, |_, s| {
        if s.units() < 6 {
            expected_answer(s)
        } else {
            wrong(s)
        }
    });

    let lengths: Vec<usize> = controller.stimuli().iter().map(|s| s.units()).collect();
    assert_eq!(lengths, vec![3, 4, 5, 6]);

    let outcome = controller.outcome().unwrap();
    assert_eq!(outcome.correct_count, 5);
    assert_eq!(outcome.total_count, 9);
    assert_eq!(outcome.percentage, 56);
    assert_eq!(outcome.level, Level::Medium);
    assert_eq!(outcome.detail["span"], 5);
}

#[test]
fn digit_span_grows_by_one_until_max() {
    let mut service = MemoryResultService::new();
    let mut controller = start(definition(TestKind::DigitSpan), 9, &mut service);

    run_to_end(&mut controller, |_, s| expected_answer(s));

    let stimuli = controller.stimuli();
    assert_eq!(stimuli.first().unwrap().units(), 3);
    for pair in stimuli.windows(2) {
        assert_eq!(pair[1].units(), pair[0].units() + 1);
    }
    assert_eq!(stimuli.last().unwrap().units(), 9);

    let outcome = controller.outcome().unwrap();
    assert_eq!((outcome.correct_count, outcome.total_count), (9, 9));
    assert_eq!(outcome.level, Level::High);
}

#[test]
fn stroop_all_yes_counts_congruent_trials() {
    let mut service = MemoryResultService::new();
    let mut controller = start(definition(TestKind::Stroop), 21, &mut service);
    let congruent = controller.stimuli().iter().filter(|s| s.target).count();

    run_to_end(&mut controller, |_, _| Answer::Yes);

    let outcome = controller.outcome().unwrap();
    assert_eq!(outcome.correct_count, congruent);
    assert_eq!(outcome.total_count, 12);
    if congruent > 0 {
        assert_eq!(outcome.detail["congruentAccuracy"], 100);
    }
    if congruent < 12 {
        assert_eq!(outcome.detail["incongruentAccuracy"], 0);
    }
}

#[test]
fn failed_submission_keeps_the_outcome() {
    let mut service = MemoryResultService::new();
    let mut controller = start(definition(TestKind::Arithmetic), 2, &mut service);
    run_to_end(&mut controller, |_, s| expected_answer(s));
    let scored = controller.outcome().unwrap().clone();

    service.fail_next_submit(ServiceError::Unavailable("offline".into()));
    let err = controller.submit(&mut service).unwrap_err();
    assert_matches!(&err, EngineError::SubmissionFailed { outcome, .. } if **outcome == scored);
    assert!(service.submissions.is_empty());

    let ack = controller.submit(&mut service).unwrap();
    assert_eq!(controller.outcome(), Some(&scored));
    assert_eq!(service.submissions.len(), 1);
    assert_eq!(service.submissions[0].1.correct, scored.correct_count);

    // resubmitting a submitted session reuses the first ack
    assert_eq!(controller.submit(&mut service).unwrap(), ack);
    assert_eq!(service.submissions.len(), 1);
}

#[test]
fn start_failure_leaves_the_controller_idle() {
    let mut service = MemoryResultService::new();
    service.fail_start(ServiceError::Unauthorized);
    let def = definition(TestKind::Stroop);
    let pools = PoolSet::builtin().unwrap();
    let mut controller =
        SessionController::new(def, &pools, StimulusGenerator::seeded(1)).unwrap();

    assert_matches!(
        controller.begin(&mut service),
        Err(EngineError::SessionStartFailed(ServiceError::Unauthorized))
    );
    assert_eq!(controller.phase(), Phase::Init);
    assert!(controller.session().is_none());
}

#[test]
fn same_seed_same_session() {
    let mut service = MemoryResultService::new();
    for kind in TestKind::ALL {
        let a = start(definition(kind), 77, &mut service);
        let b = start(definition(kind), 77, &mut service);
        assert_eq!(a.study(), b.study(), "{kind}");
        assert_eq!(a.stimuli(), b.stimuli(), "{kind}");
    }
}

#[test]
fn session_limit_times_out_the_rest() {
    let mut def = definition(TestKind::Stroop);
    def.configuration.time_limit_seconds = 1;
    let mut service = MemoryResultService::new();
    let mut controller = start(def, 4, &mut service);

    for _ in 0..2 {
        assert!(controller.respond_current(Answer::No).unwrap());
    }
    controller.on_tick(Duration::from_millis(1_200));

    assert!(controller.is_complete());
    let responses = controller.responses();
    assert_eq!(responses.len(), 12);
    assert_eq!(responses.iter().filter(|r| r.is_timeout).count(), 10);
    assert_eq!(controller.outcome().unwrap().total_count, 12);
}

#[test]
fn completed_session_ignores_late_events() {
    let mut service = MemoryResultService::new();
    let mut controller = start(definition(TestKind::Stroop), 8, &mut service);
    run_to_end(&mut controller, |_, _| Answer::No);
    let outcome = controller.outcome().cloned();
    let first = controller.stimuli()[0].id;

    controller.on_tick(Duration::from_secs(60));
    assert!(!controller.respond(first, Answer::Yes).unwrap());
    assert!(!controller.respond_current(Answer::Yes).unwrap());

    assert_eq!(controller.responses().len(), 12);
    assert_eq!(controller.outcome().cloned(), outcome);
}

#[test]
fn respond_window_expiry_records_a_timeout_once() {
    let mut service = MemoryResultService::new();
    let mut controller = start(definition(TestKind::Arithmetic), 6, &mut service);
    let respond = controller.timings().respond;
    let first = controller.current_stimulus().unwrap().id;

    controller.on_tick(respond);
    assert_eq!(controller.responses().len(), 1);
    assert!(controller.responses()[0].is_timeout);
    assert_eq!(controller.responses()[0].answer, Answer::Timeout);

    // the answer arrives after the window already closed
    assert!(!controller.respond(first, Answer::Number(1.0)).unwrap());
    assert_eq!(controller.responses().len(), 1);
    assert_eq!(controller.trial_index(), 1);
}

#[test]
fn session_runs_on_a_configured_pool() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("glyphs.json");
    let items: Vec<String> = (0..5).map(|i| format!(r#"{{"value": "glyph-{i}"}}"#)).collect();
    std::fs::write(
        &path,
        format!(r#"{{"name": "glyphs", "items": [{}]}}"#, items.join(", ")),
    )
    .unwrap();
    let config = Config {
        pools: BTreeMap::from([(TestKind::SymbolMemory, path)]),
        ..Config::default()
    };
    let pools = config.pool_set().unwrap();

    let def = definition(TestKind::SymbolMemory);
    let timings = PhaseTimings {
        intro: Duration::ZERO,
        ..def.timings()
    };
    let mut service = MemoryResultService::new();
    let mut controller = SessionController::new(def, &pools, StimulusGenerator::seeded(3))
        .unwrap()
        .with_timings(timings);
    controller.begin(&mut service).unwrap();

    assert_eq!(controller.study().len(), 3);
    assert_eq!(controller.stimuli().len(), 5);
    let from_pool = |s: &Stimulus| s.item_value().is_some_and(|v| v.starts_with("glyph-"));
    assert!(controller.study().iter().all(from_pool));
    assert!(controller.stimuli().iter().all(from_pool));

    run_to_end(&mut controller, |_, s| expected_answer(s));
    let outcome = controller.outcome().unwrap();
    assert_eq!((outcome.correct_count, outcome.total_count), (5, 5));
}
