use std::io;
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols::Marker;
use ratatui::text::{Line, Span};
use ratatui::widgets::canvas::{Canvas, Line as CanvasLine, Map, MapResolution, Points};
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::circle::{
    CIRCLE_SEGMENTS, Circle, CircleTool, GeoPoint, MapPoint, MapProjection, PlateCarree,
    PressOutcome, ToolState,
};

const MIN_SPAN_DEG: f64 = 0.005;
const MAX_SPAN_DEG: f64 = 360.0;

/// Visible window of the lon/lat canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center_lon: f64,
    pub center_lat: f64,
    /// Longitude degrees across the canvas.
    pub span: f64,
}

impl Viewport {
    pub fn new(center_lon: f64, center_lat: f64, span: f64) -> Self {
        Self {
            center_lon,
            center_lat,
            span: span.clamp(MIN_SPAN_DEG, MAX_SPAN_DEG),
        }
    }

    /// Terminal cells are roughly twice as tall as wide.
    fn lat_span(&self, area: Rect) -> f64 {
        if area.width == 0 {
            return self.span / 2.0;
        }
        self.span * f64::from(area.height) * 2.0 / f64::from(area.width)
    }

    pub fn x_bounds(&self) -> [f64; 2] {
        [
            self.center_lon - self.span / 2.0,
            self.center_lon + self.span / 2.0,
        ]
    }

    pub fn y_bounds(&self, area: Rect) -> [f64; 2] {
        let half = self.lat_span(area) / 2.0;
        [self.center_lat - half, self.center_lat + half]
    }

    /// Canvas coordinates of a terminal cell, `None` outside `area`.
    pub fn cell_to_map(&self, area: Rect, column: u16, row: u16) -> Option<MapPoint> {
        if area.width == 0
            || area.height == 0
            || column < area.x
            || row < area.y
            || column >= area.x + area.width
            || row >= area.y + area.height
        {
            return None;
        }
        let [x_min, x_max] = self.x_bounds();
        let [y_min, y_max] = self.y_bounds(area);
        let fx = (f64::from(column - area.x) + 0.5) / f64::from(area.width);
        let fy = (f64::from(row - area.y) + 0.5) / f64::from(area.height);
        Some(MapPoint::new(
            x_min + fx * (x_max - x_min),
            y_max - fy * (y_max - y_min),
        ))
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center_lon = (self.center_lon + dx * self.span).clamp(-180.0, 180.0);
        self.center_lat = (self.center_lat + dy * self.span).clamp(-90.0, 90.0);
    }

    pub fn zoom(&mut self, factor: f64) {
        self.span = (self.span * factor).clamp(MIN_SPAN_DEG, MAX_SPAN_DEG);
    }
}

/// Terminal map for the two-click circle capture.
pub struct AreaPicker {
    viewport: Viewport,
    tool: CircleTool<PlateCarree>,
    canvas_area: Rect,
    preview_m: Option<f64>,
    prompt: Option<String>,
    message: String,
}

impl AreaPicker {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            tool: CircleTool::new(PlateCarree),
            canvas_area: Rect::default(),
            preview_m: None,
            prompt: None,
            message: "Click the circle center".to_string(),
        }
    }

    /// Returns the confirmed circle, or `None` when the user quits.
    pub fn run(mut self) -> miette::Result<Option<Circle>> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        stdout.execute(EnableMouseCapture).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let outcome = loop {
            terminal
                .draw(|frame| self.draw(frame))
                .into_diagnostic()?;

            if !event::poll(Duration::from_millis(100)).into_diagnostic()? {
                continue;
            }
            match event::read().into_diagnostic()? {
                Event::Key(key) => {
                    if let Some(outcome) = self.handle_key(key) {
                        break outcome;
                    }
                }
                Event::Mouse(mouse) => self.handle_mouse(mouse),
                _ => {}
            }
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(DisableMouseCapture).into_diagnostic()?;
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        Ok(outcome)
    }

    /// `Some(result)` ends the session.
    fn handle_key(&mut self, key: KeyEvent) -> Option<Option<Circle>> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if let Some(buffer) = self.prompt.as_mut() {
            match key.code {
                KeyCode::Enter => {
                    let answer = buffer.clone();
                    self.prompt = None;
                    self.preview_m = None;
                    match self.tool.confirm(Some(&answer)) {
                        Some(circle) => return Some(Some(circle)),
                        None => self.message = format!("Invalid radius `{answer}`, start again"),
                    }
                }
                KeyCode::Esc => {
                    self.prompt = None;
                    self.preview_m = None;
                    self.tool.confirm(None);
                    self.message = "Radius cancelled, click a new center".to_string();
                }
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(ch) if ch.is_ascii_digit() || ch == '.' || ch == ',' => {
                    buffer.push(ch);
                }
                _ => {}
            }
            return None;
        }

        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => {
                if matches!(self.tool.state(), ToolState::Idle) {
                    return Some(None);
                }
                self.tool.reset();
                self.preview_m = None;
                self.message = "Center cleared".to_string();
            }
            KeyCode::Left => self.viewport.pan(-0.1, 0.0),
            KeyCode::Right => self.viewport.pan(0.1, 0.0),
            KeyCode::Up => self.viewport.pan(0.0, 0.1),
            KeyCode::Down => self.viewport.pan(0.0, -0.1),
            KeyCode::Char('+') | KeyCode::Char('=') => self.viewport.zoom(0.5),
            KeyCode::Char('-') => self.viewport.zoom(2.0),
            _ => {}
        }
        None
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        if self.prompt.is_some() {
            return;
        }
        let Some(point) = self
            .viewport
            .cell_to_map(self.canvas_area, mouse.column, mouse.row)
        else {
            return;
        };
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => match self.tool.press(point) {
                PressOutcome::CenterPlaced(center) => {
                    self.message = format!(
                        "Center lat={:.5} lon={:.5}; click the radius point",
                        center.lat, center.lon
                    );
                }
                PressOutcome::RadiusPrompt { measured_m } => {
                    self.preview_m = Some(measured_m);
                    self.prompt = Some(format!("{measured_m:.0}"));
                    self.message = "Confirm or edit the radius in metres".to_string();
                }
                PressOutcome::Ignored => {}
            },
            MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                if let Some(radius) = self.tool.hover(point) {
                    self.preview_m = Some(radius);
                }
            }
            MouseEventKind::ScrollUp => self.viewport.zoom(0.8),
            MouseEventKind::ScrollDown => self.viewport.zoom(1.25),
            _ => {}
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(6), Constraint::Length(3)])
            .split(frame.area());

        let block = Block::default()
            .borders(Borders::ALL)
            .title("Pick an area (arrows pan, +/- zoom, q quits)");
        self.canvas_area = block.inner(chunks[0]);

        let ring = self
            .preview_m
            .map(|radius| self.tool.preview_ring(radius, CIRCLE_SEGMENTS))
            .unwrap_or_default();
        let center = self
            .tool
            .state()
            .center()
            .map(|(map, _)| (map.x, map.y));

        let canvas = Canvas::default()
            .block(block)
            .marker(Marker::Braille)
            .x_bounds(self.viewport.x_bounds())
            .y_bounds(self.viewport.y_bounds(self.canvas_area))
            .paint(|ctx| {
                ctx.draw(&Map {
                    color: Color::DarkGray,
                    resolution: MapResolution::High,
                });
                ctx.layer();
                for pair in ring.windows(2) {
                    ctx.draw(&CanvasLine::new(
                        pair[0].x,
                        pair[0].y,
                        pair[1].x,
                        pair[1].y,
                        Color::Yellow,
                    ));
                }
                if let Some(center) = center {
                    ctx.draw(&Points {
                        coords: &[center],
                        color: Color::Red,
                    });
                }
            });
        frame.render_widget(canvas, chunks[0]);

        let view_center = PlateCarree.to_geographic(MapPoint::new(
            self.viewport.center_lon,
            self.viewport.center_lat,
        ));
        let footer = match &self.prompt {
            Some(buffer) => vec![
                Line::from(Span::styled(
                    self.message.clone(),
                    Style::default().fg(Color::Cyan),
                )),
                Line::from(vec![
                    Span::styled(
                        "Radius (m): ",
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::raw(buffer.clone()),
                    Span::styled("   Enter confirm, Esc cancel", Style::default().fg(Color::DarkGray)),
                ]),
            ],
            None => vec![
                Line::from(Span::styled(
                    self.message.clone(),
                    Style::default().fg(Color::Cyan),
                )),
                Line::from(Span::styled(
                    status_line(view_center, self.viewport.span, self.preview_m),
                    Style::default().fg(Color::DarkGray),
                )),
            ],
        };
        frame.render_widget(
            Paragraph::new(footer).block(Block::default().borders(Borders::TOP)),
            chunks[1],
        );
    }
}

fn status_line(center: GeoPoint, span: f64, preview_m: Option<f64>) -> String {
    let radius = preview_m
        .map(|radius| format!("   radius {radius:.0} m"))
        .unwrap_or_default();
    format!(
        "view lat={:.4} lon={:.4} width={span:.3} deg{radius}",
        center.lat, center.lon
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_map_to_viewport_corners() {
        let viewport = Viewport::new(2.0, 46.0, 10.0);
        let area = Rect::new(1, 1, 100, 25);
        let top_left = viewport.cell_to_map(area, 1, 1).unwrap();
        assert!(top_left.x < 2.0 && top_left.y > 46.0);
        let bottom_right = viewport.cell_to_map(area, 100, 25).unwrap();
        assert!(bottom_right.x > 2.0 && bottom_right.y < 46.0);
        assert_eq!(viewport.cell_to_map(area, 0, 5), None);
        assert_eq!(viewport.cell_to_map(area, 101, 5), None);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut viewport = Viewport::new(0.0, 0.0, 1.0);
        for _ in 0..40 {
            viewport.zoom(0.5);
        }
        assert_eq!(viewport.span, MIN_SPAN_DEG);
        viewport.zoom(1e9);
        assert_eq!(viewport.span, MAX_SPAN_DEG);
    }
}
