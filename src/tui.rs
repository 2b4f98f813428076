#![cfg(feature = "tui")]

use crate::app::{self, Settings};
use crate::config;
use crate::provider::{ModelVariant, ResponseClient};
use crate::session::{ChatSession, MessageEntry};
use crate::typing::TypingScheduler;
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

const HELP: &str = "Enter sends. Commands: /quit, /clear, /dismiss, /model <gemini-1.5-flash|gemini-2.0-flash>";

struct View<'a> {
    http: &'a reqwest::Client,
    cfg: Option<&'a config::Config>,
    provider: &'a str,
    session: ChatSession,
    input: String,
    model: ModelVariant,
    notice: String,
    frame: usize,
}

pub async fn run_tui(
    http: &reqwest::Client,
    cfg: Option<&config::Config>,
    settings: &Settings,
    client: Arc<dyn ResponseClient>,
) -> anyhow::Result<()> {
    let session = ChatSession::new(client, TypingScheduler::new(settings.pacing));
    let mut session_events = session.subscribe();

    let mut view = View {
        http,
        cfg,
        provider: &settings.provider,
        session,
        input: String::new(),
        model: settings.model,
        notice: HELP.to_string(),
        frame: 0,
    };

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(120));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                view.frame = view.frame.wrapping_add(1);
                if let Err(e) = draw(&mut terminal, &view) {
                    break Err(e);
                }
            }
            Some(_) = session_events.recv() => {
                // Coalesce bursts of typing updates into one redraw.
                while session_events.try_recv().is_ok() {}
                if let Err(e) = draw(&mut terminal, &view) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut view) {
                        break Ok(());
                    }
                    if let Err(e) = draw(&mut terminal, &view) {
                        break Err(e);
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Returns `true` when the user asked to quit.
fn handle_key(key: KeyEvent, view: &mut View<'_>) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => view.input.push(c),
        KeyCode::Backspace => {
            view.input.pop();
        }
        KeyCode::Enter => {
            let msg = std::mem::take(&mut view.input);
            let cmd = msg.trim();

            if cmd == "/quit" {
                return true;
            }
            if cmd == "/clear" {
                view.session.clear_messages();
                view.notice = "cleared".to_string();
                return false;
            }
            if cmd == "/dismiss" {
                view.session.dismiss_error();
                return false;
            }
            if let Some(rest) = cmd.strip_prefix("/model") {
                view.notice = match rest.parse::<ModelVariant>() {
                    Ok(model) => match app::build_client(view.http, view.cfg, view.provider, model) {
                        Ok(client) => {
                            view.session.set_client(client);
                            view.model = model;
                            format!("model set to: {model}")
                        }
                        Err(e) => format!("{e:#}"),
                    },
                    Err(e) => e.to_string(),
                };
                return false;
            }

            // Blank input is ignored by the session itself.
            let session = view.session.clone();
            tokio::spawn(async move {
                session.send_message(&msg).await;
            });
        }
        _ => {}
    }

    false
}

fn entry_lines(entry: &MessageEntry) -> Vec<Line<'static>> {
    let who = if entry.is_user { "you" } else { "gemini" };
    let style = if entry.is_user {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let mut out = vec![Line::styled(
        format!("{who} · {}", entry.timestamp.format("%H:%M")),
        style,
    )];
    out.extend(Text::from(entry.content.clone()).lines);
    out.push(Line::from(""));
    out
}

fn status_line(view: &View<'_>) -> String {
    let dots = ".".repeat(view.frame % 3 + 1);
    if let Some(err) = view.session.error() {
        format!("error: {err} (/dismiss)")
    } else if view.session.is_loading() {
        format!("waiting for {}{dots}", view.model)
    } else if view.session.has_queued_answer() {
        format!("typing{dots} (next answer queued)")
    } else if view.session.is_typing() {
        format!("typing{dots}")
    } else {
        view.notice.clone()
    }
}

fn draw(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, view: &View<'_>) -> anyhow::Result<()> {
    let messages = view.session.messages();
    let status = status_line(view);

    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        for m in &messages {
            text.lines.extend(entry_lines(m));
        }

        // Keep the newest lines in view.
        let visible = chunks[0].height.saturating_sub(2) as usize;
        let scroll = text.lines.len().saturating_sub(visible) as u16;

        let chat = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("gemini-chat — {} / {}", view.provider, view.model)),
            )
            .wrap(Wrap { trim: false })
            .scroll((scroll, 0));

        let status_w = Paragraph::new(status.clone()).style(Style::default().add_modifier(Modifier::DIM));

        let input_w = Paragraph::new(view.input.clone())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(status_w, chunks[1]);
        f.render_widget(input_w, chunks[2]);

        let x = chunks[2].x + 1 + view.input.chars().count() as u16;
        let y = chunks[2].y + 1;
        f.set_cursor_position((x.min(chunks[2].x + chunks[2].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
