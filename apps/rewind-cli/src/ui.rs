use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::Result;
use crossterm::{
    event::{self, Event as CEvent, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph},
    Terminal,
};
use rewind_types::{
    clip::{Clip, ClipId},
    events::{EventPayload, SystemEvent},
    frame::{Frame, FrameSize},
    playback::{PlaybackMode, PlaybackStatus},
    telemetry::BufferStats,
};
use tokio::sync::mpsc::UnboundedSender;

const MAX_LOG_ENTRIES: usize = 120;

/// State pushed to the terminal every progress tick.
#[derive(Debug, Clone, Default)]
pub struct UiSnapshot {
    pub capturing: bool,
    pub buffer: BufferStats,
    pub playback: PlaybackStatus,
    pub clips: Vec<Clip>,
    pub pending_saves: usize,
    pub live_frame: Option<LiveFrame>,
}

/// What the header shows about the newest frame on the live feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveFrame {
    pub sequence: u64,
    pub size: FrameSize,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Frame> for LiveFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            sequence: frame.sequence(),
            size: frame.size(),
            captured_at: frame.captured_at(),
        }
    }
}

impl LiveFrame {
    fn describe(&self) -> String {
        format!(
            "frame #{} {} at {}",
            self.sequence,
            self.size,
            self.captured_at.format("%H:%M:%S%.3f")
        )
    }
}

pub enum UiMessage {
    Event(SystemEvent),
    Snapshot(UiSnapshot),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    Save,
    Select(ClipId),
    Toggle,
    /// Seek by this many steps; negative rewinds.
    Seek(f64),
    Live,
    Rename(ClipId, String),
    Delete(ClipId),
    Copy(ClipId),
    Reload,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum KeyAction {
    Command(UiCommand),
    Up,
    Down,
    BeginRename(ClipId),
    ConfirmDelete(ClipId),
    Ignore,
}

/// Map a key in browsing mode to what it does.
pub(crate) fn action_for(key: KeyCode, selected: Option<ClipId>) -> KeyAction {
    let on_selected = |make: fn(ClipId) -> KeyAction| selected.map_or(KeyAction::Ignore, make);
    match key {
        KeyCode::Char(' ') => KeyAction::Command(UiCommand::Save),
        KeyCode::Char('p') => KeyAction::Command(UiCommand::Toggle),
        KeyCode::Char('l') => KeyAction::Command(UiCommand::Live),
        KeyCode::Char('r') => KeyAction::Command(UiCommand::Reload),
        KeyCode::Left => KeyAction::Command(UiCommand::Seek(-1.0)),
        KeyCode::Right => KeyAction::Command(UiCommand::Seek(1.0)),
        KeyCode::Up | KeyCode::Char('k') => KeyAction::Up,
        KeyCode::Down | KeyCode::Char('j') => KeyAction::Down,
        KeyCode::Enter => on_selected(|id| KeyAction::Command(UiCommand::Select(id))),
        KeyCode::Char('c') => on_selected(|id| KeyAction::Command(UiCommand::Copy(id))),
        KeyCode::Char('n') => on_selected(KeyAction::BeginRename),
        KeyCode::Char('d') => on_selected(KeyAction::ConfirmDelete),
        KeyCode::Char('q') | KeyCode::Esc => KeyAction::Command(UiCommand::Quit),
        _ => KeyAction::Ignore,
    }
}

enum Prompt {
    Rename { id: ClipId, input: String },
    Delete(ClipId),
}

struct ViewState {
    logs: VecDeque<String>,
    last_status: String,
    snapshot: UiSnapshot,
    list: ListState,
    prompt: Option<Prompt>,
}

impl ViewState {
    fn new() -> Self {
        Self {
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            last_status: String::from("Starting"),
            snapshot: UiSnapshot::default(),
            list: ListState::default(),
            prompt: None,
        }
    }

    fn selected(&self) -> Option<ClipId> {
        self.list
            .selected()
            .and_then(|index| self.snapshot.clips.get(index))
            .and_then(|clip| clip.id)
    }

    fn push_log(&mut self, line: String) {
        if self.logs.len() == MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
    }

    fn apply_snapshot(&mut self, snapshot: UiSnapshot) {
        let keep = self.selected();
        self.snapshot = snapshot;
        let index = keep
            .and_then(|id| self.snapshot.clips.iter().position(|clip| clip.id == Some(id)))
            .or_else(|| clamp_selection(self.list.selected(), self.snapshot.clips.len()));
        self.list.select(index);
    }

    fn step(&mut self, forward: bool) {
        let len = self.snapshot.clips.len();
        if len == 0 {
            self.list.select(None);
            return;
        }
        let next = match (self.list.selected(), forward) {
            (None, _) => 0,
            (Some(i), true) => (i + 1).min(len - 1),
            (Some(i), false) => i.saturating_sub(1),
        };
        self.list.select(Some(next));
    }
}

fn clamp_selection(selected: Option<usize>, len: usize) -> Option<usize> {
    match (selected, len) {
        (_, 0) => None,
        (None, _) => Some(0),
        (Some(i), len) => Some(i.min(len - 1)),
    }
}

pub fn run(
    receiver: Receiver<UiMessage>,
    commands: UnboundedSender<UiCommand>,
    summary: String,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.hide_cursor()?;

    let res = run_loop(&mut terminal, receiver, &commands, summary.as_str());

    terminal.show_cursor()?;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    let _ = commands.send(UiCommand::Quit);
    res
}

fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    receiver: Receiver<UiMessage>,
    commands: &UnboundedSender<UiCommand>,
    summary: &str,
) -> Result<()> {
    let mut view = ViewState::new();

    loop {
        let mut closed = false;
        loop {
            match receiver.try_recv() {
                Ok(UiMessage::Event(event)) => {
                    if let Some(status) = summarize_status(&event) {
                        view.last_status = status;
                    }
                    if let Some(line) = format_event(&event) {
                        view.push_log(line);
                    }
                }
                Ok(UiMessage::Snapshot(snapshot)) => view.apply_snapshot(snapshot),
                Ok(UiMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        if closed {
            break;
        }

        terminal.draw(|f| draw(f, &mut view, summary))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let CEvent::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match view.prompt.take() {
            Some(Prompt::Rename { id, mut input }) => match key.code {
                KeyCode::Enter => {
                    let _ = commands.send(UiCommand::Rename(id, input));
                }
                KeyCode::Esc => {}
                KeyCode::Backspace => {
                    input.pop();
                    view.prompt = Some(Prompt::Rename { id, input });
                }
                KeyCode::Char(c) => {
                    input.push(c);
                    view.prompt = Some(Prompt::Rename { id, input });
                }
                _ => view.prompt = Some(Prompt::Rename { id, input }),
            },
            Some(Prompt::Delete(id)) => {
                if matches!(key.code, KeyCode::Char('y')) {
                    let _ = commands.send(UiCommand::Delete(id));
                }
            }
            None => match action_for(key.code, view.selected()) {
                KeyAction::Command(UiCommand::Quit) => break,
                KeyAction::Command(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                KeyAction::Up => view.step(false),
                KeyAction::Down => view.step(true),
                KeyAction::BeginRename(id) => {
                    let input = view
                        .snapshot
                        .clips
                        .iter()
                        .find(|clip| clip.id == Some(id))
                        .map(|clip| clip.name.clone())
                        .unwrap_or_default();
                    view.prompt = Some(Prompt::Rename { id, input });
                }
                KeyAction::ConfirmDelete(id) => view.prompt = Some(Prompt::Delete(id)),
                KeyAction::Ignore => {}
            },
        }
    }

    Ok(())
}

fn draw(f: &mut ratatui::Frame, view: &mut ViewState, summary: &str) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(3),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(f.size());

    let snapshot = &view.snapshot;
    let feed = if snapshot.capturing {
        Span::styled("LIVE", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("NO CAMERA", Style::default().fg(Color::Red))
    };
    let live_frame = snapshot
        .live_frame
        .map(|frame| format!("  {}", frame.describe()))
        .unwrap_or_default();
    let header = Paragraph::new(Line::from(vec![
        feed,
        Span::styled(live_frame, Style::default().fg(Color::DarkGray)),
        Span::raw(format!(
            "  buffer {}/{}  saving {}  ",
            snapshot.buffer.len, snapshot.buffer.capacity, snapshot.pending_saves
        )),
        Span::styled(summary.to_string(), Style::default().fg(Color::Magenta)),
        Span::raw("  "),
        Span::raw(view.last_status.clone()),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Rewind"));
    f.render_widget(header, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)].as_ref())
        .split(rows[1]);

    let playing = snapshot.playback.clip;
    let items: Vec<ListItem> = snapshot
        .clips
        .iter()
        .map(|clip| {
            let marker = if clip.id.is_some() && clip.id == playing { "> " } else { "  " };
            ListItem::new(format!(
                "{marker}{}  ({:.1}s)",
                clip.display_info(),
                clip.duration_seconds
            ))
        })
        .collect();
    let clips = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Replays"))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_stateful_widget(clips, body[0], &mut view.list);

    let logs: Vec<ListItem> = view
        .logs
        .iter()
        .rev()
        .map(|entry| ListItem::new(entry.clone()))
        .collect();
    let log = List::new(logs).block(Block::default().borders(Borders::ALL).title("Events"));
    f.render_widget(log, body[1]);

    let playback = &snapshot.playback;
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(mode_label(playback.mode)))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(playback.progress_ratio())
        .label(format!(
            "{:.1}s / {:.1}s",
            playback.position.as_secs_f64(),
            playback.duration.as_secs_f64()
        ));
    f.render_widget(gauge, rows[2]);

    let help = match &view.prompt {
        Some(Prompt::Rename { input, .. }) => format!("Rename: {input}_   (enter to apply, esc to cancel)"),
        Some(Prompt::Delete(id)) => format!("Delete clip {id}? (y to confirm)"),
        None => "space save  enter play  p pause  \u{2190}/\u{2192} seek  l live  n rename  d delete  c copy  r reload  q quit"
            .to_string(),
    };
    f.render_widget(Paragraph::new(help), rows[3]);
}

fn mode_label(mode: PlaybackMode) -> &'static str {
    match mode {
        PlaybackMode::Live => "Live",
        PlaybackMode::Loading => "Loading",
        PlaybackMode::Playing => "Playing",
        PlaybackMode::Paused => "Paused",
        PlaybackMode::Seeking => "Seeking",
        PlaybackMode::Ended => "Ended",
    }
}

fn summarize_status(event: &SystemEvent) -> Option<String> {
    let status = match &event.payload {
        EventPayload::Lifecycle(phase) => format!("{phase:?}"),
        EventPayload::Notice(message) => message.clone(),
        EventPayload::SaveStarted { frames } => format!("Saving {frames} frames"),
        EventPayload::SaveCompleted { clip, .. } => format!("Saved {}", clip.name),
        EventPayload::SaveFailed(message) => message.clone(),
        EventPayload::LibraryLoaded { clips } => format!("{clips} replays"),
        EventPayload::ClipRenamed { .. }
        | EventPayload::ClipDeleted(_)
        | EventPayload::ClipCopied { .. }
        | EventPayload::Playback(_) => return None,
    };
    Some(status)
}

fn format_event(event: &SystemEvent) -> Option<String> {
    let timestamp = event.timestamp.format("%H:%M:%S");
    let line = match &event.payload {
        EventPayload::Lifecycle(phase) => format!("[{timestamp}] Lifecycle::{phase:?}"),
        EventPayload::Notice(message) => format!("[{timestamp}] ! {message}"),
        EventPayload::SaveStarted { frames } => format!("[{timestamp}] Saving {frames} frames"),
        EventPayload::SaveCompleted { clip, timing } => format!(
            "[{timestamp}] Saved {} ({:.1}s, encode {} ms)",
            clip.display_info(),
            clip.duration_seconds,
            timing.encode_ms
        ),
        EventPayload::SaveFailed(message) => format!("[{timestamp}] Save failed: {message}"),
        EventPayload::ClipRenamed { id, name } => format!("[{timestamp}] Renamed {id} to {name}"),
        EventPayload::ClipDeleted(id) => format!("[{timestamp}] Deleted {id}"),
        EventPayload::ClipCopied { id, destination } => {
            format!("[{timestamp}] Copied {id} to {destination}")
        }
        EventPayload::LibraryLoaded { clips } => format!("[{timestamp}] Loaded {clips} replays"),
        EventPayload::Playback(_) => return None,
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_map_to_commands() {
        let id = Some(ClipId(4));
        assert_eq!(
            action_for(KeyCode::Char(' '), None),
            KeyAction::Command(UiCommand::Save)
        );
        assert_eq!(
            action_for(KeyCode::Enter, id),
            KeyAction::Command(UiCommand::Select(ClipId(4)))
        );
        assert_eq!(action_for(KeyCode::Enter, None), KeyAction::Ignore);
        assert_eq!(action_for(KeyCode::Char('d'), id), KeyAction::ConfirmDelete(ClipId(4)));
        assert_eq!(action_for(KeyCode::Char('n'), id), KeyAction::BeginRename(ClipId(4)));
        assert_eq!(
            action_for(KeyCode::Left, None),
            KeyAction::Command(UiCommand::Seek(-1.0))
        );
    }

    #[test]
    fn live_frame_describes_the_newest_capture() {
        let frame = Frame::new(
            FrameSize::new(640, 480),
            rewind_types::frame::PixelFormat::Rgb24,
            Vec::new(),
            42,
        );
        let live = LiveFrame::from(&frame);
        assert_eq!(live.sequence, 42);
        assert!(live.describe().starts_with("frame #42 640x480 at "));
    }

    #[test]
    fn selection_stays_in_range() {
        assert_eq!(clamp_selection(Some(5), 2), Some(1));
        assert_eq!(clamp_selection(None, 3), Some(0));
        assert_eq!(clamp_selection(Some(0), 0), None);
    }

    #[test]
    fn playback_events_stay_out_of_the_log() {
        let event = SystemEvent::new(EventPayload::Playback(PlaybackStatus::default()));
        assert!(format_event(&event).is_none());
        let notice = SystemEvent::notice("Camera not found.");
        assert!(format_event(&notice).unwrap().ends_with("! Camera not found."));
        assert_eq!(summarize_status(&notice).as_deref(), Some("Camera not found."));
    }
}
