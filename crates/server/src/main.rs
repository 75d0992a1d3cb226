mod config;
mod events;
mod room_actor;
mod server;
mod tui;

use std::io;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::net::TcpListener;

use config::ServerConfig;
use events::ServerEvent;
use server::Shared;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "physync-server")]
#[command(about = "Authoritative room-based physics synchronization server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = physync::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig { bind: args.bind, port: args.port, tick_rate: args.tick_rate };

    let shared = Shared::new(config.tick_rate);
    let listener = TcpListener::bind(config.bind_addr()).await?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        log::info!("listening on {}", config.bind_addr());
        let mut events = shared.events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                log::info!("{}", event.describe());
            }
        });
        accept_loop(listener, shared).await
    } else {
        tokio::spawn(accept_loop(listener, shared.clone()));
        let handle = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || run_tui(shared, handle)).await?
    }
}

async fn accept_loop(listener: TcpListener, shared: std::sync::Arc<Shared>) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(server::handle_connection(stream, shared));
    }
}

fn run_tui(shared: std::sync::Arc<Shared>, runtime: tokio::runtime::Handle) -> Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut events = shared.events.subscribe();
    let mut tui_state = TuiState::new();
    tui_state.log_info(format!("server listening, tick rate {} Hz", shared.tick_rate));

    loop {
        while let Ok(event) = events.try_recv() {
            match event {
                ServerEvent::Error { message } => tui_state.log_error(message),
                other => tui_state.log_info(other.describe()),
            }
        }

        let room_count = runtime.block_on(shared.room_count());
        let connection_count = runtime.block_on(shared.connection_count());
        tui_state.set_stats(room_count, connection_count);

        if event::poll(std::time::Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        _ => {}
                    }
                }
            }
        }

        terminal.draw(|frame| tui::render(frame, &tui_state))?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;
    Ok(())
}
