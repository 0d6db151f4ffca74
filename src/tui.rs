use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::InatError;

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 200;

/// Which job the progress view is tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Import,
    Enrich,
}

impl JobKind {
    fn label(self) -> &'static str {
        match self {
            JobKind::Import => "Import",
            JobKind::Enrich => "Enrich",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Circle,
    Fetch,
    Project,
    Write,
    Taxonomy,
    Update,
}

impl Phase {
    const PREFIXES: [(&'static str, Phase); 6] = [
        ("phase=Circle;", Phase::Circle),
        ("phase=Fetch;", Phase::Fetch),
        ("phase=Project;", Phase::Project),
        ("phase=Write;", Phase::Write),
        ("phase=Taxonomy;", Phase::Taxonomy),
        ("phase=Update", Phase::Update),
    ];

    fn label(self) -> &'static str {
        match self {
            Phase::Circle => "Circle",
            Phase::Fetch => "Fetch",
            Phase::Project => "Project",
            Phase::Write => "Write",
            Phase::Taxonomy => "Taxonomy",
            Phase::Update => "Update",
        }
    }
}

#[derive(Debug)]
struct JobState {
    status: String,
    phase: Option<Phase>,
    position: Option<(usize, usize)>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
}

impl JobState {
    fn new() -> Self {
        Self {
            status: "starting".to_string(),
            phase: None,
            position: None,
            events: VecDeque::new(),
            logs: VecDeque::new(),
            started: Instant::now(),
        }
    }
}

/// Progress view for a long job. The job runs on a worker thread; Esc asks it
/// to stop at its next checkpoint.
pub struct Tui {
    kind: JobKind,
    state: Arc<Mutex<JobState>>,
    cancel: Arc<AtomicBool>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<JobState>>,
    cancel: Arc<AtomicBool>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            match parse_phase(&message) {
                Some((phase, payload)) => {
                    if state.phase != Some(phase) {
                        state.position = None;
                    }
                    state.phase = Some(phase);
                    if !payload.is_empty() {
                        state.status = payload.to_string();
                    }
                }
                None => state.status = message.clone(),
            }
            if event.position.is_some() {
                state.position = event.position;
            }
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            let stamp = chrono::Local::now().format("%H:%M:%S");
            push_bounded(&mut state.logs, format!("[{stamp}] {message}"), LOGS_MAX);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

impl Tui {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(JobState::new())),
            cancel: Arc::new(AtomicBool::new(false)),
            log_scroll: 0,
        }
    }

    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, InatError> + Send + 'static,
        R: Send + 'static,
    {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
            cancel: self.cancel.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                let cancelling = self.cancel.load(Ordering::Relaxed);
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick, cancelling))
                    .into_diagnostic()?;
            }

            if let Some(outcome) = poll_outcome(&rx) {
                break outcome;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    self.handle_key(key);
                }
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        result
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Esc => {
                if !self.cancel.swap(true, Ordering::Relaxed) {
                    tracing::warn!(job = self.kind.label(), "cancellation requested");
                }
            }
            KeyCode::PageUp => self.scroll_logs(5),
            KeyCode::PageDown => self.scroll_logs(-5),
            _ => {}
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll);
        self.log_scroll = next as u16;
    }
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &JobState, tick: usize, cancelling: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(1),
        ])
        .split(frame.area());

    let heartbeat = if tick % 2 == 0 { "*" } else { " " };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "iNat-IMPORT",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Job: "),
        Span::styled(tui.kind.label(), Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(heartbeat, Style::default().fg(Color::Green)),
    ]))
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::BOTTOM));
    frame.render_widget(header, chunks[0]);

    let phase_label = state.phase.map(Phase::label).unwrap_or("Starting");
    let elapsed = state.started.elapsed().as_secs();
    let mut status_lines = vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(phase_label, Style::default().fg(Color::Cyan)),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}m {:02}s", elapsed / 60, elapsed % 60)),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
    ];
    for event in state.events.iter().rev().take(3) {
        status_lines.push(Line::from(format!("- {event}")));
    }
    let status = Paragraph::new(status_lines)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });
    frame.render_widget(status, chunks[1]);

    let (ratio, label) = match state.position {
        Some((current, total)) if total > 0 => (
            (current as f64 / total as f64).clamp(0.0, 1.0),
            format!("{current}/{total}"),
        ),
        _ => (0.0, "--".to_string()),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("PROGRESS"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(ratio)
        .label(label);
    frame.render_widget(gauge, chunks[2]);

    let visible = chunks[3].height.saturating_sub(2) as usize;
    let total = state.logs.len();
    let start = total.saturating_sub(tui.log_scroll as usize + visible);
    let log_lines = state
        .logs
        .iter()
        .skip(start)
        .take(visible)
        .map(|line| Line::from(line.clone()))
        .collect::<Vec<_>>();
    let logs = Paragraph::new(log_lines)
        .block(Block::default().borders(Borders::ALL).title("LOGS"))
        .wrap(Wrap { trim: true });
    frame.render_widget(logs, chunks[3]);

    let footer = if cancelling {
        Span::styled(
            "Cancelling, waiting for the current step to finish...",
            Style::default().fg(Color::Yellow),
        )
    } else {
        Span::styled(
            "Esc: cancel   PgUp/PgDown: scroll logs",
            Style::default().fg(Color::DarkGray),
        )
    };
    frame.render_widget(Paragraph::new(Line::from(footer)), chunks[4]);
}

/// `None` while the job is still running. A worker that panicked drops its
/// sender, which ends the wait with an error.
fn poll_outcome<R>(rx: &Receiver<Result<R, InatError>>) -> Option<miette::Result<R>> {
    match rx.try_recv() {
        Ok(result) => Some(result.map_err(miette::Report::new)),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => {
            Some(Err(miette::miette!("job stopped without reporting a result")))
        }
    }
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    Phase::PREFIXES.iter().find_map(|(prefix, phase)| {
        message
            .strip_prefix(*prefix)
            .map(|rest| (*phase, rest.trim_start_matches(';').trim()))
    })
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_prefix_is_stripped() {
        assert_eq!(
            parse_phase("phase=Fetch; page 2 (200 observations so far)"),
            Some((Phase::Fetch, "page 2 (200 observations so far)"))
        );
        assert_eq!(parse_phase("phase=Update"), Some((Phase::Update, "")));
        assert_eq!(parse_phase("taxon 12 not found"), None);
    }

    #[test]
    fn dropped_worker_ends_the_wait() {
        let (tx, rx) = mpsc::channel::<Result<usize, InatError>>();
        assert!(poll_outcome(&rx).is_none());

        let worker = thread::spawn(move || {
            let _tx = tx;
            panic!("worker failed");
        });
        assert!(worker.join().is_err());

        let outcome = poll_outcome(&rx).unwrap();
        assert!(outcome.is_err());
    }

    #[test]
    fn finished_worker_result_is_returned() {
        let (tx, rx) = mpsc::channel();
        tx.send(Ok::<_, InatError>(7)).unwrap();
        assert_eq!(poll_outcome(&rx).unwrap().unwrap(), 7);

        tx.send(Err(InatError::Cancelled)).unwrap();
        assert!(poll_outcome(&rx).unwrap().is_err());
    }

    #[test]
    fn sink_tracks_position_and_cancel_flag() {
        let sink = TuiProgress {
            state: Arc::new(Mutex::new(JobState::new())),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        sink.event(ProgressEvent::at("phase=Taxonomy; taxon 3", 2, 5));
        {
            let state = sink.state.lock().unwrap();
            assert_eq!(state.phase, Some(Phase::Taxonomy));
            assert_eq!(state.position, Some((2, 5)));
            assert_eq!(state.status, "taxon 3");
        }
        assert!(!sink.is_cancelled());
        sink.cancel.store(true, Ordering::Relaxed);
        assert!(sink.is_cancelled());
    }
}
