use std::collections::VecDeque;
use std::io::{Stdout, stdout};
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, SetTitle, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};
use tracing::warn;

use crate::bridge::{BridgeStatus, UiHost};
use crate::control::PluginUi;
use crate::params::{ParameterHints, ParameterInfo};
use crate::{BridgeError, pop_log};

const LOG_LINES: usize = 200;
const NOTE_LENGTH: Duration = Duration::from_millis(250);
const NOTE_VELOCITY: u8 = 100;
const PIANO_KEYS: [char; 13] = [
    'z', 's', 'x', 'd', 'c', 'v', 'g', 'b', 'h', 'n', 'j', 'm', ',',
];

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    ValueInput,
}

struct ValueEditor {
    index: u32,
    buffer: String,
}

#[derive(Default)]
struct AppState {
    title: String,
    values: Vec<f32>,
    selected: usize,
    program: Option<(u32, String)>,
    status: Option<BridgeStatus>,
    mode: Mode,
    message: Option<String>,
    logs: VecDeque<String>,
    held: Vec<(u8, Instant)>,
    octave: u8,
}

/// Terminal console: live parameter table, computer-keyboard piano and log pane.
///
/// Owns the terminal in raw mode until dropped.
pub struct Console {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    app: AppState,
    editor: Option<ValueEditor>,
    interval: Duration,
    running: bool,
}

impl Console {
    /// Take over the terminal. `interval` bounds how long one idle tick waits for input.
    pub fn new(interval: Duration) -> Result<Self, BridgeError> {
        setup_terminal()?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
        terminal.clear()?;
        Ok(Self {
            terminal,
            app: AppState {
                octave: 4,
                ..AppState::default()
            },
            editor: None,
            interval,
            running: true,
        })
    }

    fn sync(&mut self, host: &UiHost) {
        let count = host.parameters().len();
        if self.app.values.len() != count {
            self.app.values = (0..count as u32)
                .map(|index| host.parameter_value(index).unwrap_or_default())
                .collect();
        }
        while let Some(line) = pop_log() {
            self.app.logs.push_back(line);
            while self.app.logs.len() > LOG_LINES {
                self.app.logs.pop_front();
            }
        }
    }

    fn release_notes(&mut self, host: &mut UiHost) {
        let now = Instant::now();
        self.app.held.retain(|&(note, until)| {
            if until > now {
                return true;
            }
            host.send_note(0, note, 0);
            false
        });
    }

    fn handle_key(&mut self, host: &mut UiHost, key: KeyEvent) {
        match self.app.mode {
            Mode::Normal => self.handle_normal_key(host, key),
            Mode::ValueInput => self.handle_input_key(host, key),
        }
    }

    fn handle_normal_key(&mut self, host: &mut UiHost, key: KeyEvent) {
        let parameters = host.parameters();
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.quit(),
            KeyCode::Char('q') | KeyCode::Esc => self.quit(),
            KeyCode::Up => {
                self.app.selected = self.app.selected.saturating_sub(1);
            }
            KeyCode::Down => {
                if self.app.selected + 1 < parameters.len() {
                    self.app.selected += 1;
                }
            }
            KeyCode::Left | KeyCode::Right => {
                let Some(info) = parameters.get(self.app.selected) else {
                    return;
                };
                let step = if info.hints.contains(ParameterHints::INTEGER) {
                    1.0
                } else {
                    (info.ranges.max - info.ranges.min) / 100.0
                };
                let delta = if key.code == KeyCode::Left { -step } else { step };
                let current = self.app.values.get(self.app.selected).copied();
                let target = current.unwrap_or(info.ranges.def) + delta;
                self.request(host, self.app.selected as u32, target);
            }
            KeyCode::Enter => {
                let Some(info) = parameters.get(self.app.selected) else {
                    return;
                };
                if info.is_output() {
                    self.app.message = Some(format!("{} is read-only", info.name));
                    return;
                }
                let current = self.app.values.get(self.app.selected).copied();
                self.editor = Some(ValueEditor {
                    index: self.app.selected as u32,
                    buffer: format!("{:.3}", current.unwrap_or(info.ranges.def)),
                });
                self.app.mode = Mode::ValueInput;
            }
            KeyCode::Char('t') => {
                let Some(info) = parameters.get(self.app.selected) else {
                    return;
                };
                if info.is_trigger() {
                    let (name, max) = (info.name, info.ranges.max);
                    if self.request(host, self.app.selected as u32, max) {
                        self.app.message = Some(format!("Fired {name}"));
                    }
                }
            }
            KeyCode::Char('-') => {
                self.app.octave = self.app.octave.saturating_sub(1);
            }
            KeyCode::Char('=') => {
                self.app.octave = (self.app.octave + 1).min(9);
            }
            KeyCode::Char(c) => {
                if let Some(offset) = PIANO_KEYS.iter().position(|&k| k == c) {
                    self.play(host, offset as u8);
                }
            }
            _ => {}
        }
    }

    fn handle_input_key(&mut self, host: &mut UiHost, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.editor.take();
                self.app.mode = Mode::Normal;
            }
            KeyCode::Enter => {
                if let Some(editor) = self.editor.take() {
                    match editor.buffer.trim().parse::<f32>() {
                        Ok(value) => {
                            self.request(host, editor.index, value);
                        }
                        Err(_) => {
                            self.app.message = Some(format!("Not a number: {}", editor.buffer));
                        }
                    }
                }
                self.app.mode = Mode::Normal;
            }
            KeyCode::Backspace => {
                if let Some(editor) = self.editor.as_mut() {
                    editor.buffer.pop();
                }
            }
            KeyCode::Char(c) => {
                if let Some(editor) = self.editor.as_mut() {
                    if c.is_ascii_digit() || matches!(c, '.' | '-' | '+') {
                        editor.buffer.push(c);
                    }
                }
            }
            _ => {}
        }
    }

    fn request(&mut self, host: &UiHost, index: u32, value: f32) -> bool {
        match host.set_parameter_value(index, value) {
            Ok(value) => {
                if let Some(slot) = self.app.values.get_mut(index as usize) {
                    *slot = value;
                }
                true
            }
            Err(err) => {
                self.app.message = Some(err.to_string());
                false
            }
        }
    }

    fn play(&mut self, host: &mut UiHost, offset: u8) {
        let note = (self.app.octave + 1) * 12 + offset;
        if note > 127 {
            return;
        }
        if host.send_note(0, note, NOTE_VELOCITY) {
            self.app.held.push((note, Instant::now() + NOTE_LENGTH));
        } else {
            self.app.message = Some("Note channel full".into());
        }
    }

    fn draw(&mut self, host: &UiHost) -> Result<(), BridgeError> {
        let app = &self.app;
        let editor = self.editor.as_ref();
        let parameters = host.parameters();
        self.terminal
            .draw(|frame| draw(frame, app, parameters, editor))?;
        Ok(())
    }
}

impl PluginUi for Console {
    fn parameter_changed(&mut self, index: u32, value: f32) {
        let index = index as usize;
        if index >= self.app.values.len() {
            self.app.values.resize(index + 1, 0.0);
        }
        self.app.values[index] = value;
    }

    fn program_loaded(&mut self, index: u32) {
        self.app.program = Some((index, String::new()));
        self.app.message = Some(format!("Program {index} loaded"));
    }

    fn set_window_title(&mut self, title: &str) {
        self.app.title = title.to_string();
        if let Err(err) = stdout().execute(SetTitle(title)) {
            warn!(%err, "cannot set terminal title");
        }
    }

    fn exec_idle(&mut self, host: &mut UiHost) -> Result<(), BridgeError> {
        self.app.status = Some(host.status());
        if let Some((index, name)) = self.app.program.as_mut() {
            if name.is_empty() {
                *name = host.program_name(*index).unwrap_or_default().to_string();
            }
        }
        self.sync(host);
        self.release_notes(host);
        self.draw(host)?;

        let deadline = Instant::now() + self.interval;
        let mut timeout = self.interval;
        while self.running && event::poll(timeout)? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    self.handle_key(host, key);
                }
            }
            timeout = deadline.saturating_duration_since(Instant::now());
        }
        Ok(())
    }

    fn quit(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        if let Err(err) = restore_terminal() {
            warn!(%err, "cannot restore terminal");
        }
    }
}

fn setup_terminal() -> Result<(), BridgeError> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    Ok(())
}

fn restore_terminal() -> Result<(), BridgeError> {
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    Ok(())
}

fn draw(
    frame: &mut ratatui::Frame<'_>,
    app: &AppState,
    parameters: &[ParameterInfo],
    editor: Option<&ValueEditor>,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(8),
            Constraint::Length(8),
            Constraint::Length(4),
        ])
        .split(frame.size());

    draw_header(frame, chunks[0], app);
    draw_parameters(frame, chunks[1], app, parameters);
    draw_logs(frame, chunks[2], app);
    draw_footer(frame, chunks[3], app);

    if let Some(editor) = editor {
        let area = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(frame.size())[1];

        let name = parameters
            .get(editor.index as usize)
            .map_or("value", |info| info.name);
        let block = Block::default()
            .title(format!("Set {name} (Enter to apply, Esc to cancel)"))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));

        let paragraph = Paragraph::new(editor.buffer.clone())
            .block(block)
            .wrap(Wrap { trim: false });

        frame.render_widget(Clear, area);
        frame.render_widget(paragraph, area);
    }
}

fn draw_header(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let title = if app.title.is_empty() {
        "Plugin Bridge".to_string()
    } else {
        app.title.clone()
    };
    let block = Block::default().title(title).borders(Borders::ALL);

    let content = if let Some(status) = &app.status {
        let program = match &app.program {
            Some((index, name)) if !name.is_empty() => format!("{index}: {name}"),
            Some((index, _)) => index.to_string(),
            None => "-".to_string(),
        };
        let state_color = if status.shutdown_requested {
            Color::Red
        } else {
            Color::Green
        };
        Paragraph::new(vec![
            Line::from(vec![
                Span::styled(
                    status.lifecycle.as_str(),
                    Style::default().fg(state_color).add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!(
                    "    Sample Rate: {} Hz    Buffer: {} frames    Program: {}",
                    status.sample_rate, status.buffer_size, program
                )),
            ]),
            Line::from(format!(
                "Cycles: {}    Intercepted: {}    Program changes: {}    State changes: {}    Dropped notes: {}    Dropped events: {}    Fetch errors: {}    Torn positions: {}",
                status.cycles,
                status.intercepted,
                status.program_changes,
                status.state_changes,
                status.notes_dropped,
                status.midi_events_dropped,
                status.midi_fetch_errors,
                status.invalid_positions,
            )),
        ])
    } else {
        Paragraph::new(Line::from(vec![Span::styled(
            "Waiting for bridge",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )]))
    };

    frame.render_widget(content.block(block), area);
}

fn draw_parameters(
    frame: &mut ratatui::Frame<'_>,
    area: ratatui::prelude::Rect,
    app: &AppState,
    parameters: &[ParameterInfo],
) {
    let block = Block::default().title("Parameters").borders(Borders::ALL);

    let header = Row::new(vec![
        Cell::from(""),
        Cell::from("Name"),
        Cell::from("Value"),
        Cell::from("Unit"),
        Cell::from("Range"),
        Cell::from("CC"),
        Cell::from("Kind"),
    ])
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let rows = parameters.iter().enumerate().map(|(idx, info)| {
        let indicator = if idx == app.selected { ">" } else { "" };
        let value = app.values.get(idx).copied().unwrap_or(info.ranges.def);
        let value = if info.hints.contains(ParameterHints::INTEGER) {
            format!("{value:.0}")
        } else {
            format!("{value:.3}")
        };
        let kind = if info.is_output() {
            "output"
        } else if info.is_trigger() {
            "trigger"
        } else {
            "input"
        };
        let mut row = Row::new(vec![
            Cell::from(indicator.to_string()),
            Cell::from(info.name),
            Cell::from(value),
            Cell::from(info.unit),
            Cell::from(format!("{} .. {}", info.ranges.min, info.ranges.max)),
            Cell::from(info.midi_cc.map_or_else(String::new, |cc| cc.to_string())),
            Cell::from(kind),
        ]);
        if idx == app.selected {
            row = row.style(Style::default().fg(Color::Yellow));
        } else if info.is_output() {
            row = row.style(Style::default().fg(Color::DarkGray));
        }
        row
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(20),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Length(18),
            Constraint::Length(4),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(block)
    .column_spacing(2);

    frame.render_widget(table, area);
}

fn draw_logs(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = app.logs.len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .logs
        .iter()
        .skip(skip)
        .map(|line| Line::from(line.as_str()))
        .collect();
    let paragraph =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Log"));
    frame.render_widget(paragraph, area);
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: ratatui::prelude::Rect, app: &AppState) {
    let info = format!(
        "Up/Down: Select  Left/Right: Nudge  Enter: Edit  t: Fire trigger  z..,: Play (octave {})  -/=: Octave  q: Quit",
        app.octave
    );
    let mut lines = vec![Line::from(info)];
    if let Some(message) = &app.message {
        lines.push(Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Green),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true });
    frame.render_widget(paragraph, area);
}
