use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget, Wrap},
};
use std::time::Duration;
use unicode_width::UnicodeWidthStr;

use cognit::catalog::TestKind;
use cognit::scoring::Level;
use cognit::session::Phase;
use cognit::stimulus::{Payload, Stimulus};

use crate::{App, AppState, SubmissionStatus};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 2;

fn seconds(d: Option<Duration>) -> String {
    format!("{:.1}s", d.unwrap_or_default().as_secs_f64())
}

/// `#RRGGBB` to a terminal colour
pub fn parse_hex(hex: &str) -> Option<Color> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some(Color::Rgb(channel(0)?, channel(2)?, channel(4)?))
}

fn level_style(level: Level) -> Style {
    let color = match level {
        Level::High => Color::Green,
        Level::Medium => Color::Yellow,
        Level::Low => Color::Red,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn prompt_lines(app: &App, stimulus: &Stimulus) -> Vec<Line<'static>> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let dim = Style::default().add_modifier(Modifier::DIM);
    let kind = app.controller.definition().kind;

    match &stimulus.payload {
        Payload::Item { value } => {
            let question = match kind {
                TestKind::AuditoryMemory => "Same item as before?",
                _ => "Was this in the set?",
            };
            vec![
                Line::from(Span::styled(question.to_string(), dim)),
                Line::from(Span::styled(value.clone(), bold)),
                Line::from(Span::styled("[y] yes   [n] no".to_string(), dim)),
            ]
        }
        Payload::Choice { item, options, .. } => {
            let choices = options
                .iter()
                .enumerate()
                .map(|(i, o)| format!("[{}] {o}", i + 1))
                .collect::<Vec<_>>()
                .join("   ");
            vec![
                Line::from(Span::styled(
                    format!("Which letter does {item} start with?"),
                    dim,
                )),
                Line::from(Span::styled(choices, bold)),
            ]
        }
        Payload::Digits { .. } => vec![
            Line::from(Span::styled(
                "Type the sequence, Enter to confirm".to_string(),
                dim,
            )),
            Line::from(Span::styled(format!("{}_", app.input), bold)),
        ],
        Payload::ColourWord { word, hex, .. } => {
            let ink = parse_hex(hex).unwrap_or(Color::White);
            vec![
                Line::from(Span::styled(
                    "Does the word name its own colour?".to_string(),
                    dim,
                )),
                Line::from(Span::styled(word.to_uppercase(), bold.fg(ink))),
                Line::from(Span::styled("[y] match   [n] no match".to_string(), dim)),
            ]
        }
        Payload::Operation { op, lhs, rhs } => vec![
            Line::from(Span::styled(format!("{lhs} {op} {rhs} = {}_", app.input), bold)),
            Line::from(Span::styled(
                "Enter to confirm, two decimals for fractions".to_string(),
                dim,
            )),
        ],
    }
}

fn session_lines(app: &App) -> Vec<Line<'static>> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let dim = Style::default().add_modifier(Modifier::DIM);
    let controller = &app.controller;

    match controller.phase() {
        Phase::Init | Phase::Scoring => vec![Line::from("...")],
        Phase::IntroCountdown => vec![
            Line::from(Span::styled(controller.definition().name.clone(), bold)),
            Line::from(Span::styled(
                format!("starting in {}", seconds(controller.remaining())),
                dim,
            )),
        ],
        Phase::Presenting if controller.is_showing_study() => {
            let items = controller
                .study()
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>()
                .join("   ");
            vec![
                Line::from(Span::styled("Memorize".to_string(), dim)),
                Line::from(Span::styled(items, bold)),
            ]
        }
        Phase::Presenting => match controller.current_stimulus() {
            Some(stimulus) => {
                let shown = match (stimulus.digits(), controller.presentation_unit()) {
                    (Some(digits), Some(unit)) => digits
                        .get(unit)
                        .map(u8::to_string)
                        .unwrap_or_default(),
                    _ => stimulus.label(),
                };
                vec![Line::from(Span::styled(shown, bold))]
            }
            None => Vec::new(),
        },
        Phase::Responding => match controller.current_stimulus() {
            Some(stimulus) => prompt_lines(app, stimulus),
            None => Vec::new(),
        },
        Phase::Complete => Vec::new(),
    }
}

fn results_lines(app: &App) -> Vec<Line<'static>> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let italic = Style::default().add_modifier(Modifier::ITALIC);
    let Some(outcome) = app.controller.outcome() else {
        return vec![Line::from("no result")];
    };

    let status = match &app.submission {
        Some(SubmissionStatus::Submitted(id)) => {
            Span::styled(format!("saved as {id}"), Style::default().fg(Color::Green))
        }
        Some(SubmissionStatus::Failed(err)) => Span::styled(
            format!("not submitted ({err}), kept for retry"),
            Style::default().fg(Color::Red),
        ),
        None => Span::styled("submitting...".to_string(), italic),
    };

    vec![
        Line::from(Span::styled(
            format!("{}%", outcome.percentage),
            level_style(outcome.level),
        )),
        Line::from(vec![
            Span::styled(format!("{} / {} correct", outcome.correct_count, outcome.total_count), bold),
            Span::raw("   "),
            Span::styled(outcome.level.to_string(), level_style(outcome.level)),
        ]),
        Line::from(Span::styled(
            format!("{}s", outcome.time_spent_seconds),
            italic,
        )),
        Line::from(""),
        Line::from(status),
        Line::from(""),
        Line::from(Span::styled("(q)uit".to_string(), italic)),
    ]
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let dim = Style::default().add_modifier(Modifier::DIM);
        let controller = &self.controller;

        let lines = match self.state {
            AppState::Session => session_lines(self),
            AppState::Results => results_lines(self),
        };

        let max_width = area.width.saturating_sub(HORIZONTAL_MARGIN * 2).max(1) as usize;
        let occupied: u16 = lines
            .iter()
            .map(|l| l.width().max(1).div_ceil(max_width) as u16)
            .sum();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints(
                [
                    Constraint::Length(1),
                    Constraint::Min(0),
                    Constraint::Length(occupied),
                    Constraint::Min(0),
                    Constraint::Length(1),
                ]
                .as_ref(),
            )
            .split(area);

        let header = format!(
            "{}   trial {}/{}",
            controller.definition().name,
            (controller.trial_index() + 1).min(controller.stimuli().len()),
            controller.stimuli().len()
        );
        Paragraph::new(Span::styled(header, dim))
            .alignment(Alignment::Left)
            .render(chunks[0], buf);

        Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(chunks[2], buf);

        if self.state == AppState::Session {
            let mut footer = match controller.phase() {
                Phase::Presenting | Phase::Responding => seconds(controller.remaining()),
                _ => String::new(),
            };
            if let Some(left) = controller.session_remaining() {
                footer.push_str(&format!("   session {}", seconds(Some(left))));
            }
            let footer_width = footer.width() as u16;
            Paragraph::new(Span::styled(footer, dim))
                .alignment(if footer_width < chunks[4].width {
                    Alignment::Center
                } else {
                    Alignment::Left
                })
                .render(chunks[4], buf);
        }
    }
}
