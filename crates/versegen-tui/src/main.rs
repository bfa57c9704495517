use anyhow::{anyhow, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use versegen_core::Config;

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

/// Log to a file; stdout and stderr belong to the terminal UI.
fn init_logging() -> Result<PathBuf> {
    let log_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?
        .join("versegen");
    fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("versegen.log");
    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    let filter = EnvFilter::try_from_env("VERSEGEN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    Ok(log_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = init_logging()?;

    let mut config = Config::load().unwrap_or_else(|_| Config::new());
    // A path argument overrides the configured fixture
    if let Some(fixture) = std::env::args().nth(1) {
        config.fixture = Some(PathBuf::from(fixture));
    }
    let store = config.open_store()?;
    tracing::info!(log = %log_path.display(), "starting verse generator");

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(store);

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    app.unmount();
    result
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            event = events.next() => match event {
                Some(event) => handler::handle_event(app, event),
                None => break,
            },
            _ = app.session.process_next() => {}
        }
    }
    Ok(())
}
