use std::collections::VecDeque;
use std::time::Instant;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

const MAX_LOG_LINES: usize = 500;

struct LogLine {
    text: String,
    is_error: bool,
}

pub struct TuiState {
    started: Instant,
    room_count: usize,
    connection_count: usize,
    log: VecDeque<LogLine>,
    scroll: usize,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            room_count: 0,
            connection_count: 0,
            log: VecDeque::new(),
            scroll: 0,
        }
    }

    pub fn set_stats(&mut self, room_count: usize, connection_count: usize) {
        self.room_count = room_count;
        self.connection_count = connection_count;
    }

    pub fn log_info(&mut self, text: String) {
        self.push(text, false);
    }

    pub fn log_error(&mut self, text: String) {
        self.push(text, true);
    }

    fn push(&mut self, text: String, is_error: bool) {
        self.log.push_back(LogLine { text, is_error });
        if self.log.len() > MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.scroll = 0;
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }
}

pub fn render(frame: &mut Frame, state: &TuiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)])
        .split(frame.area());

    render_header(frame, chunks[0], state);
    render_log(frame, chunks[1], state);
    render_help(frame, chunks[2]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState) {
    let uptime = format_duration(state.started.elapsed().as_secs());
    let block = Block::default()
        .title(format!(" physync-server - Uptime: {uptime} "))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!("Rooms: {}  |  Connections: {}", state.room_count, state.connection_count);

    let paragraph = Paragraph::new(text).block(block).style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Activity ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let visible_rows = area.height.saturating_sub(2) as usize;
    let total = state.log.len();
    let end = total.saturating_sub(state.scroll);
    let start = end.saturating_sub(visible_rows);

    let lines: Vec<Line> = state
        .log
        .iter()
        .skip(start)
        .take(end - start)
        .map(|entry| {
            let style = if entry.is_error {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::Gray)
            };
            Line::from(Span::styled(entry.text.clone(), style))
        })
        .collect();

    let paragraph = Paragraph::new(lines).block(block);
    frame.render_widget(paragraph, area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit  |  PgUp/PgDn scroll  |  End jump to bottom")
        .block(block)
        .style(Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC));

    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{hours:02}:{mins:02}:{secs:02}")
}
