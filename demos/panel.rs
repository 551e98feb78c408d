use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use pioneer_avr::{
    load_config, AvrClient, MessageKind, SetOutcome, StateReceiver, StateUpdate, VOLUME_MAX_DB,
    VOLUME_MIN_DB,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;

/// Coarse step for the `[` / `]` keys
const VOLUME_JUMP_DB: f64 = 5.0;

struct App {
    client: AvrClient,
    updates: StateReceiver,
    status_message: String,
}

impl App {
    fn new(client: AvrClient) -> Self {
        let updates = client.subscribe();
        Self {
            client,
            updates,
            status_message: "p power, +/- volume, [/] jump, i input, s speakers, d display, q quit"
                .to_string(),
        }
    }

    fn report(&mut self, what: &str, outcome: pioneer_avr::Result<SetOutcome>) {
        self.status_message = match outcome {
            Ok(SetOutcome::Applied) => format!("{}: sent", what),
            Ok(SetOutcome::AlreadyCurrent) => format!("{}: already set", what),
            Ok(SetOutcome::RejectedPowerOff) => format!("{}: receiver is off", what),
            Err(e) => format!("{}: {}", what, e),
        };
    }

    fn toggle_power(&mut self) {
        let avr = self.client.controller();
        let outcome = avr.set_power(!avr.power());
        self.report("Power", outcome);
    }

    fn step_volume(&mut self, up: bool) {
        let avr = self.client.controller();
        let outcome = if up { avr.volume_up() } else { avr.volume_down() };
        self.report("Volume", outcome);
    }

    fn jump_volume(&mut self, delta: f64) {
        let avr = self.client.controller();
        let target = (avr.volume_db() + delta).clamp(VOLUME_MIN_DB, VOLUME_MAX_DB);
        let outcome = avr.set_volume(target);
        self.report(&format!("Volume {:.1} dB", target), outcome);
    }

    fn cycle_input(&mut self) {
        let avr = self.client.controller();
        let inputs = avr.input_names();
        let current = avr.active_input();
        let idx = inputs.iter().position(|i| i.channel == current).unwrap_or(0);
        let next = &inputs[(idx + 1) % inputs.len()];
        let outcome = avr.set_active_input(next.channel);
        let label = format!("Input {}", next.name);
        self.report(&label, outcome);
    }

    fn cycle_speakers(&mut self) {
        let avr = self.client.controller();
        let next = avr.speaker_config().next();
        let outcome = avr.set_speaker_config(next);
        self.report(&format!("Speakers {}", next), outcome);
    }

    fn refresh_display(&mut self) {
        self.status_message = match self.client.controller().query_display_text() {
            Ok(()) => "Display: requested".to_string(),
            Err(e) => format!("Display: {}", e),
        };
    }

    /// Drain pending state updates; returns false once the receiver is gone
    fn handle_state_updates(&mut self) -> bool {
        loop {
            match self.updates.try_recv() {
                Ok(Some(StateUpdate::Disconnected(reason))) => {
                    self.status_message = format!("Receiver unreachable: {}", reason);
                }
                Ok(Some(StateUpdate::Changed(MessageKind::Power))) => {
                    let on = self.client.controller().power();
                    self.status_message = format!("Power {}", if on { "ON" } else { "OFF" });
                }
                Ok(Some(StateUpdate::Changed(_))) => {}
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(8), Constraint::Length(3)])
        .split(f.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[0]);

    render_summary(f, app, columns[0]);
    render_inputs(f, app, columns[1]);
    render_status(f, app, chunks[1]);
}

fn render_summary(f: &mut Frame, app: &App, area: Rect) {
    let state = app.client.state();
    let title = format!(" Receiver {} ", app.client.peer_addr());
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let enabled = if state.power {
        Style::default()
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let lines = vec![
        Line::from(vec![
            Span::styled("Power:    ", Style::default().fg(Color::Yellow)),
            Span::styled(
                if state.power { "ON" } else { "OFF" },
                if state.power {
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                } else {
                    Style::default().fg(Color::Red)
                },
            ),
        ]),
        Line::from(vec![
            Span::styled("Volume:   ", Style::default().fg(Color::Yellow)),
            Span::styled(format!("{:.1} dB", state.volume_db()), enabled),
        ]),
        Line::from(vec![
            Span::styled("Input:    ", Style::default().fg(Color::Yellow)),
            Span::styled(
                state.active_input_name().unwrap_or("?").to_string(),
                enabled,
            ),
        ]),
        Line::from(vec![
            Span::styled("Speakers: ", Style::default().fg(Color::Yellow)),
            Span::styled(state.speaker_config.label(), enabled),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::styled("Display:  ", Style::default().fg(Color::Yellow)),
            Span::styled(state.display_text.clone(), Style::default().fg(Color::Cyan)),
        ]),
    ];

    let text = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    f.render_widget(text, area);
}

fn render_inputs(f: &mut Frame, app: &App, area: Rect) {
    let state = app.client.state();
    let block = Block::default()
        .title(" Inputs ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta));

    let lines: Vec<Line> = state
        .input_names
        .iter()
        .map(|input| {
            let is_active = input.channel == state.active_input;
            let prefix = if is_active { "  ▶ " } else { "    " };
            Line::from(vec![
                Span::raw(prefix),
                Span::styled(
                    format!("{:02}  {}", input.channel, input.name),
                    if is_active {
                        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default()
                    },
                ),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(app.status_message.clone())
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Connect before touching the terminal so errors print normally
    let config = load_config()?;
    let client = AvrClient::connect(&config).await?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(client);
    let res = run_app(&mut terminal, &mut app).await;

    app.client.close().await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        if !app.handle_state_updates() {
            return Ok(());
        }

        terminal.draw(|f| ui(f, app))?;

        // Keep the poll short so state updates show up promptly
        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('p') => app.toggle_power(),
                        KeyCode::Char('+') | KeyCode::Char('=') => app.step_volume(true),
                        KeyCode::Char('-') | KeyCode::Char('_') => app.step_volume(false),
                        KeyCode::Char(']') => app.jump_volume(VOLUME_JUMP_DB),
                        KeyCode::Char('[') => app.jump_volume(-VOLUME_JUMP_DB),
                        KeyCode::Char('i') => app.cycle_input(),
                        KeyCode::Char('s') => app.cycle_speakers(),
                        KeyCode::Char('d') => app.refresh_display(),
                        _ => {}
                    }
                }
            }
        }

        tokio::task::yield_now().await;
    }
}
