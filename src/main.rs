pub mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use cognit::{
    app_dirs::AppDirs,
    catalog::{Catalog, ScoringMethod, TestKind},
    config::{Config, ConfigStore, FileConfigStore},
    controller::SessionController,
    error::EngineError,
    runtime::{CrosstermEventSource, EngineEvent, FixedTicker, Runner},
    session::{Answer, Phase},
    stimulus::{Payload, StimulusGenerator},
    store::LocalResultStore,
};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use itertools::Itertools;
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Frame, Terminal,
};
use std::{
    error::Error,
    fs::{self, OpenOptions},
    io::{self, stdin},
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "COGNIT_LOG";

/// timed cognitive assessment tests in the terminal
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Runs timed memory, attention and reasoning tests in the terminal, scores them and keeps a local history of results."
)]
pub struct Cli {
    /// seed for reproducible stimuli
    #[clap(long, global = true)]
    seed: Option<u64>,

    /// results database to use instead of the default one
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    /// settings file to use instead of the default one
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// run one test session
    Run {
        #[clap(value_enum)]
        kind: TestKind,
    },
    /// list the available tests
    List,
    /// show submitted results, newest first
    History {
        #[clap(short, long, value_enum)]
        kind: Option<TestKind>,

        #[clap(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// submit results that could not be submitted earlier
    Retry,
    /// write every submitted result to a csv file
    Export { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Session,
    Results,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionStatus {
    Submitted(String),
    Failed(String),
}

pub struct App {
    pub controller: SessionController,
    pub state: AppState,
    /// Typed but unconfirmed digits or number
    pub input: String,
    pub submission: Option<SubmissionStatus>,
    input_trial: usize,
}

impl App {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller,
            state: AppState::Session,
            input: String::new(),
            submission: None,
            input_trial: 0,
        }
    }

    /// Id of the stimulus currently on screen
    pub fn target(&self) -> Option<usize> {
        self.controller.current_stimulus().map(|s| s.id)
    }

    /// Answer stimulus `target` with `key`.
    ///
    /// Keys for a stimulus that is no longer current are dropped, so a press
    /// that races the respond window never lands on the next trial.
    pub fn handle_key(&mut self, key: KeyEvent, target: Option<usize>) -> Result<bool, EngineError> {
        let Some(target) = target else {
            return Ok(false);
        };
        if self.target() != Some(target) {
            debug!(stimulus_id = target, "key for a closed window ignored");
            return Ok(false);
        }
        match self.answer_for_key(key) {
            Some(answer) => self.controller.respond(target, answer),
            None => Ok(false),
        }
    }

    /// Turn a key press into an answer for the current stimulus, editing the
    /// typed input on the way
    pub fn answer_for_key(&mut self, key: KeyEvent) -> Option<Answer> {
        if self.controller.phase() != Phase::Responding {
            return None;
        }
        let payload = self.controller.current_stimulus()?.payload.clone();

        match (payload, key.code) {
            (Payload::Item { .. } | Payload::ColourWord { .. }, KeyCode::Char('y')) => {
                Some(Answer::Yes)
            }
            (Payload::Item { .. } | Payload::ColourWord { .. }, KeyCode::Char('n')) => {
                Some(Answer::No)
            }
            (Payload::Choice { options, .. }, KeyCode::Char(c)) => {
                let picked = c
                    .to_digit(10)
                    .and_then(|d| (d as usize).checked_sub(1))
                    .and_then(|i| options.get(i).cloned())
                    .or_else(|| options.iter().find(|o| o.starts_with(c)).cloned());
                picked.map(Answer::Choice)
            }
            (Payload::Digits { .. }, KeyCode::Char(c)) if c.is_ascii_digit() => {
                self.input.push(c);
                None
            }
            (Payload::Operation { .. }, KeyCode::Char(c))
                if c.is_ascii_digit() || c == '.' || (c == '-' && self.input.is_empty()) =>
            {
                self.input.push(c);
                None
            }
            (Payload::Digits { .. } | Payload::Operation { .. }, KeyCode::Backspace) => {
                self.input.pop();
                None
            }
            (Payload::Digits { .. }, KeyCode::Enter) if !self.input.is_empty() => {
                let digits = self
                    .input
                    .chars()
                    .filter_map(|c| c.to_digit(10))
                    .map(|d| d as u8)
                    .collect();
                self.input.clear();
                Some(Answer::Digits(digits))
            }
            (Payload::Operation { .. }, KeyCode::Enter) => {
                let value = self.input.parse::<f64>().ok()?;
                self.input.clear();
                Some(Answer::Number(value))
            }
            _ => None,
        }
    }

    /// Drop typed input left over from a trial that timed out
    pub fn sync_input(&mut self) {
        let trial = self.controller.trial_index();
        if trial != self.input_trial {
            self.input.clear();
            self.input_trial = trial;
        }
    }

    /// Submit the finished session; a failed submission is kept in `store`
    pub fn submit(&mut self, store: &mut LocalResultStore) -> Result<(), Box<dyn Error>> {
        match self.controller.submit(store) {
            Ok(ack) => {
                self.submission = Some(SubmissionStatus::Submitted(ack.session_id));
            }
            Err(EngineError::SubmissionFailed { source, outcome }) => {
                store.record_failed_submission(&outcome, &source.to_string())?;
                self.submission = Some(SubmissionStatus::Failed(source.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}

fn init_tracing() {
    let Some(path) = AppDirs::log_path() else {
        return;
    };
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

fn database_path(cli: &Cli, config: &Config) -> PathBuf {
    cli.db
        .clone()
        .or_else(|| config.database.clone())
        .or_else(AppDirs::db_path)
        .unwrap_or_else(|| PathBuf::from("cognit_results.db"))
}

fn load_catalog(config: &Config) -> Result<Catalog, Box<dyn Error>> {
    let Some(path) = &config.catalog else {
        return Ok(Catalog::builtin());
    };
    let catalog = Catalog::from_json(&fs::read_to_string(path)?)?;
    info!(path = %path.display(), tests = catalog.tests.len(), "catalog loaded");
    Ok(catalog)
}

fn catalog_listing(catalog: &Catalog) -> String {
    catalog
        .tests
        .iter()
        .map(|t| {
            let config = &t.configuration;
            let length = match (config.scoring_method, config.start_length, config.max_length) {
                (ScoringMethod::Adaptive, Some(start), Some(max)) => format!("span {start}-{max}"),
                _ => format!("{} questions", config.question_count),
            };
            format!(
                "{:<18} {:<22} {:<8} {length}, {}s",
                t.kind.to_string(),
                t.name,
                t.difficulty.to_string(),
                config.time_limit_seconds
            )
        })
        .join("\n")
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();

    let config_store = cli
        .config
        .as_ref()
        .map(FileConfigStore::with_path)
        .unwrap_or_default();
    let config = config_store.load();
    let catalog = load_catalog(&config)?;
    let mut store = LocalResultStore::open(database_path(&cli, &config), &catalog)?;

    match &cli.command {
        Command::List => println!("{}", catalog_listing(&catalog)),
        Command::History { kind, limit } => {
            let entries = store.history(*kind, *limit)?;
            if entries.is_empty() {
                println!("no results yet");
            }
            for e in entries {
                println!(
                    "{}  {:<18} {:>3}%  {:<6} {}/{}  {}s",
                    e.submitted_at.format("%Y-%m-%d %H:%M"),
                    e.test_kind.to_string(),
                    e.percentage,
                    e.level.to_string(),
                    e.correct,
                    e.total,
                    e.time_spent_seconds
                );
            }
        }
        Command::Retry => {
            let report = store.resubmit_pending()?;
            println!(
                "{} submitted, {} still pending",
                report.submitted, report.remaining
            );
        }
        Command::Export { path } => {
            let rows = store.export_csv(path)?;
            println!("{rows} results written to {}", path.display());
        }
        Command::Run { kind } => run_session(&cli, &config, &catalog, &mut store, *kind)?,
    }

    Ok(())
}

fn run_session(
    cli: &Cli,
    config: &Config,
    catalog: &Catalog,
    store: &mut LocalResultStore,
    kind: TestKind,
) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let definition = catalog
        .by_kind(kind)
        .ok_or_else(|| format!("no test of kind {kind} in the catalog"))?
        .clone();
    let generator = match cli.seed.or(config.seed) {
        Some(seed) => StimulusGenerator::seeded(seed),
        None => StimulusGenerator::from_entropy(),
    };
    let timings = config.apply(kind, definition.timings());
    let pools = config.pool_set()?;
    let mut controller = SessionController::new(definition, &pools, generator)?.with_timings(timings);
    controller.begin(store)?;

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(controller);
    let result = start_tui(&mut terminal, &mut app, store, config.tick());

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result?;

    match app.controller.outcome() {
        Some(outcome) => println!(
            "{}: {}% ({}), {}/{} correct",
            outcome.test_id,
            outcome.percentage,
            outcome.level,
            outcome.correct_count,
            outcome.total_count
        ),
        None => info!("session abandoned"),
    }
    Ok(())
}

fn start_tui<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    store: &mut LocalResultStore,
    tick: Duration,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(CrosstermEventSource::new(), FixedTicker::new(tick));
    let mut last = Instant::now();

    loop {
        terminal.draw(|f| ui(app, f))?;

        let event = runner.step();
        // the event belongs to the stimulus on screen before this tick
        let target = app.target();
        let now = Instant::now();
        app.controller.on_tick(now.duration_since(last));
        last = now;

        match event {
            EngineEvent::Key(key) if key.kind == KeyEventKind::Press => {
                let ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
                    && key.code == KeyCode::Char('c');
                if key.code == KeyCode::Esc || ctrl_c {
                    break;
                }
                match app.state {
                    AppState::Session => {
                        app.handle_key(key, target)?;
                    }
                    AppState::Results => {
                        if matches!(key.code, KeyCode::Char('q') | KeyCode::Enter) {
                            break;
                        }
                    }
                }
            }
            EngineEvent::Answer(answer) => {
                if let Some(id) = target {
                    app.controller.respond(id, answer)?;
                }
            }
            EngineEvent::Key(_) | EngineEvent::Resize | EngineEvent::Tick => {}
        }
        app.sync_input();

        if app.state == AppState::Session && app.controller.is_complete() {
            app.state = AppState::Results;
            if let Err(err) = app.submit(store) {
                warn!(%err, "could not store result");
                app.submission = Some(SubmissionStatus::Failed(err.to_string()));
            }
        }
    }

    Ok(())
}

fn ui(app: &App, f: &mut Frame) {
    f.render_widget(app, f.area());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cognit::catalog::PhaseTimings;
    use cognit::service::{MemoryResultService, ServiceError};
    use cognit::stimulus::PoolSet;
    use crossterm::event::KeyEventState;
    use ratatui::backend::TestBackend;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn started(kind: TestKind) -> App {
        let definition = Catalog::builtin().by_kind(kind).unwrap().clone();
        let timings = PhaseTimings {
            intro: Duration::ZERO,
            study: Duration::from_millis(10),
            ..definition.timings()
        };
        let pools = PoolSet::builtin().unwrap();
        let mut controller =
            SessionController::new(definition, &pools, StimulusGenerator::seeded(7))
                .unwrap()
                .with_timings(timings);
        controller.begin(&mut MemoryResultService::new()).unwrap();
        let mut app = App::new(controller);
        for _ in 0..10_000 {
            if app.controller.phase() == Phase::Responding {
                break;
            }
            app.controller.on_tick(Duration::from_millis(5));
        }
        assert_eq!(app.controller.phase(), Phase::Responding);
        app
    }

    fn render(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|f| ui(app, f)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::parse_from(["cognit", "run", "digit-span", "--seed", "5"]);
        assert_eq!(cli.seed, Some(5));
        assert_eq!(
            cli.command,
            Command::Run {
                kind: TestKind::DigitSpan
            }
        );
    }

    #[test]
    fn parses_history_filters() {
        let cli = Cli::parse_from(["cognit", "--db", "/tmp/r.db", "history", "-k", "stroop", "-l", "3"]);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/r.db")));
        assert_eq!(
            cli.command,
            Command::History {
                kind: Some(TestKind::Stroop),
                limit: 3
            }
        );

        let cli = Cli::parse_from(["cognit", "history"]);
        assert_eq!(
            cli.command,
            Command::History {
                kind: None,
                limit: 20
            }
        );
    }

    #[test]
    fn rejects_unknown_test_kind() {
        assert!(Cli::try_parse_from(["cognit", "run", "chess"]).is_err());
    }

    #[test]
    fn database_path_prefers_the_flag() {
        let cli = Cli::parse_from(["cognit", "--db", "/tmp/a.db", "list"]);
        let config = Config {
            database: Some(PathBuf::from("/tmp/b.db")),
            ..Config::default()
        };
        assert_eq!(database_path(&cli, &config), PathBuf::from("/tmp/a.db"));

        let cli = Cli::parse_from(["cognit", "list"]);
        assert_eq!(database_path(&cli, &config), PathBuf::from("/tmp/b.db"));
    }

    #[test]
    fn listing_has_one_line_per_test() {
        let catalog = Catalog::builtin();
        let listing = catalog_listing(&catalog);
        assert_eq!(listing.lines().count(), catalog.tests.len());

        let digit_span = listing.lines().find(|l| l.starts_with("digit-span")).unwrap();
        assert!(digit_span.contains("span 3-9"), "{digit_span}");
        assert!(!digit_span.contains("questions"));
        let stroop = listing.lines().find(|l| l.starts_with("stroop")).unwrap();
        assert!(stroop.contains("12 questions"), "{stroop}");
    }

    #[test]
    fn configured_catalog_replaces_the_builtin_one() {
        assert_eq!(load_catalog(&Config::default()).unwrap(), Catalog::builtin());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let only_stroop = Catalog {
            tests: vec![Catalog::builtin().by_kind(TestKind::Stroop).unwrap().clone()],
        };
        fs::write(&path, serde_json::to_string(&only_stroop).unwrap()).unwrap();
        let config = Config {
            catalog: Some(path),
            ..Config::default()
        };
        assert_eq!(load_catalog(&config).unwrap(), only_stroop);

        let missing = Config {
            catalog: Some(dir.path().join("nope.json")),
            ..Config::default()
        };
        assert!(load_catalog(&missing).is_err());
    }

    #[test]
    fn yes_no_keys_answer_stroop() {
        let mut app = started(TestKind::Stroop);
        assert_eq!(app.answer_for_key(key(KeyCode::Char('y'))), Some(Answer::Yes));
        assert_eq!(app.answer_for_key(key(KeyCode::Char('n'))), Some(Answer::No));
        assert_eq!(app.answer_for_key(key(KeyCode::Char('x'))), None);
    }

    #[test]
    fn number_input_is_confirmed_with_enter() {
        let mut app = started(TestKind::Arithmetic);
        for c in ['-', '1', '2', '.', '5'] {
            assert_eq!(app.answer_for_key(key(KeyCode::Char(c))), None);
        }
        assert_eq!(app.input, "-12.5");
        app.answer_for_key(key(KeyCode::Backspace));
        assert_eq!(
            app.answer_for_key(key(KeyCode::Enter)),
            Some(Answer::Number(-12.0))
        );
        assert!(app.input.is_empty());
    }

    #[test]
    fn digit_input_is_confirmed_with_enter() {
        let mut app = started(TestKind::DigitSpan);
        assert_eq!(app.answer_for_key(key(KeyCode::Enter)), None);
        for c in ['4', '0', '7'] {
            app.answer_for_key(key(KeyCode::Char(c)));
        }
        assert_eq!(
            app.answer_for_key(key(KeyCode::Enter)),
            Some(Answer::Digits(vec![4, 0, 7]))
        );
    }

    #[test]
    fn choice_keys_pick_options_by_position() {
        let mut app = started(TestKind::VerbalMemory);
        let options = match &app.controller.current_stimulus().unwrap().payload {
            Payload::Choice { options, .. } => options.clone(),
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(
            app.answer_for_key(key(KeyCode::Char('2'))),
            Some(Answer::Choice(options[1].clone()))
        );
    }

    #[test]
    fn key_after_the_window_closed_is_not_moved_to_the_next_trial() {
        let mut app = started(TestKind::Stroop);
        let first = app.target().unwrap();
        let respond = app.controller.timings().respond;

        // the key is read, then the tick that was due before it closes the window
        app.controller.on_tick(respond - Duration::from_millis(10));
        let target = app.target();
        app.controller.on_tick(Duration::from_millis(20));

        assert!(!app.handle_key(key(KeyCode::Char('y')), target).unwrap());
        let responses = app.controller.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].stimulus_ref, first);
        assert_eq!(responses[0].answer, Answer::Timeout);
        assert_eq!(app.controller.trial_index(), 1);

        // the next key goes to the stimulus now on screen
        let second = app.target();
        assert!(app.handle_key(key(KeyCode::Char('y')), second).unwrap());
        assert_eq!(app.controller.responses()[1].stimulus_ref, second.unwrap());
        assert_eq!(app.controller.responses()[1].answer, Answer::Yes);
    }

    #[test]
    fn stale_input_is_dropped_when_the_trial_changes() {
        let mut app = started(TestKind::Arithmetic);
        app.answer_for_key(key(KeyCode::Char('3')));
        let respond = app.controller.timings().respond;
        app.controller.on_tick(respond + Duration::from_millis(1));
        app.sync_input();
        assert!(app.input.is_empty());
    }

    #[test]
    fn renders_the_stroop_prompt() {
        let app = started(TestKind::Stroop);
        let screen = render(&app);
        assert!(screen.contains("Does the word name its own colour?"));
        assert!(screen.contains("trial 1/"));
    }

    #[test]
    fn failed_submission_is_kept_in_the_store() {
        let catalog = Catalog::builtin();
        let mut store = LocalResultStore::open_in_memory(&catalog).unwrap();
        let mut app = started(TestKind::Stroop);
        for _ in 0..100_000 {
            if app.controller.is_complete() {
                break;
            }
            if app.controller.phase() == Phase::Responding {
                app.controller.respond_current(Answer::Yes).unwrap();
            } else {
                app.controller.on_tick(Duration::from_millis(5));
            }
        }
        assert!(app.controller.is_complete());

        // the session was opened on another service, so the store does not know it
        app.submit(&mut store).unwrap();
        assert_eq!(
            app.submission,
            Some(SubmissionStatus::Failed(ServiceError::NotFound.to_string()))
        );
        assert_eq!(store.pending().unwrap().len(), 1);

        app.state = AppState::Results;
        let screen = render(&app);
        assert!(screen.contains("correct"));
        assert!(screen.contains("kept for retry"));
    }
}
