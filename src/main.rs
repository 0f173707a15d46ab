// src/main.rs
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Stdout;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use clipboard::{ClipboardContext, ClipboardProvider};
use crossterm::event::{self, DisableBracketedPaste, EnableBracketedPaste, Event as CEvent};
use crossterm::{execute, terminal::{EnterAlternateScreen, LeaveAlternateScreen}};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter, prelude::*, Registry};

mod app;
mod azure;
mod config;
mod error;
mod keys;
mod model;
mod ui;

use app::App;
use azure::AzCli;
use config::{CliCommand, Settings};
use error::AppError;
use keys::Action;
use model::AppEvent;
use ui::draw_ui;

type Tui = Terminal<CrosstermBackend<Stdout>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = match config::parse_args(std::env::args().skip(1)) {
        CliCommand::Help => {
            println!("{}", config::USAGE);
            return Ok(());
        }
        CliCommand::Run(cli) => cli,
    };
    let settings = Settings::from_env();

    // the terminal belongs to the TUI, so logs only ever go to a file
    if cli.debug {
        init_tracing(&settings.log_file)?;
        info!(log_file = %settings.log_file.display(), "Tracing initialized (debug)");
    }

    info!("Starting Azure Key Vault TUI");
    debug!(?settings, ?cli, "configuration");

    let gateway = AzCli::new(settings.cli.clone(), settings.timeout);
    if let Some(subscription) = &cli.subscription {
        info!(%subscription, "switching subscription");
        if let Err(e) = gateway.switch_subscription(subscription).await {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();
    let mut app = App::new(Arc::new(gateway), tx, cli.filter);

    // Terminal setup
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    crossterm::terminal::enable_raw_mode()?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let outcome = run(&mut terminal, &mut app, &mut rx);

    // Cleanup
    crossterm::terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), DisableBracketedPaste, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!("Exiting Azure Key Vault TUI");
    outcome.map_err(Into::into)
}

fn init_tracing(log_file: &Path) -> Result<(), AppError> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    // RUST_LOG wins; default to debug for verbose investigation
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let fmt_layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_target(false)
        .with_ansi(false);
    Registry::default().with(filter).with(fmt_layer).init();
    Ok(())
}

fn run(terminal: &mut Tui, app: &mut App, rx: &mut UnboundedReceiver<AppEvent>) -> Result<(), AppError> {
    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    app.refresh_vaults();

    loop {
        // Advance spinner + redraw periodically
        if last_tick.elapsed() >= tick_rate {
            if app.is_busy() {
                app.throbber_state.calc_next();
            }
            terminal.draw(|f| draw_ui(f, app))?;
            last_tick = Instant::now();
        }

        // Drain background events
        while let Ok(ev) = rx.try_recv() {
            app.handle_event(ev);
        }

        if event::poll(Duration::from_millis(20))? {
            match event::read()? {
                CEvent::Key(key) => match keys::handle_key(app, key) {
                    Action::Quit => break,
                    Action::Copy(value) => app.status = copy_to_clipboard(value),
                    Action::None => {}
                },
                CEvent::Paste(text) => keys::handle_paste(app, &text),
                _ => {}
            }
        }
    }
    Ok(())
}

fn copy_to_clipboard(value: String) -> String {
    let ctx: Result<ClipboardContext, _> = ClipboardProvider::new();
    match ctx {
        Ok(mut ctx) => {
            if ctx.set_contents(value).is_ok() {
                "Secret value copied to clipboard!".into()
            } else {
                "Clipboard error".into()
            }
        }
        Err(e) => format!("Clipboard init error: {}", e),
    }
}
