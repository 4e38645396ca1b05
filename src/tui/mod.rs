mod app;
mod draw;
mod event_handler;

pub use app::{StatusType, TuiApp};
pub use draw::draw;
pub use event_handler::EventHandler;

use std::time::{Duration, Instant};

use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing::info;

use crate::cli::{build_controller, open_store};
use crate::config::Config;
use crate::controller::{InputMode, SessionController, Update};

/// Below this width the text box is cramped, so start on the shortcut grid
const NARROW_WIDTH: u16 = 80;

/// Redraw interval, so the key echo expires on time
const TICK: Duration = Duration::from_millis(100);

enum Next {
    Update(Update),
    Input(Option<std::io::Result<Event>>),
    Tick,
}

/// Attach the TUI until the operator quits
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let mut controller = build_controller(open_store(config)?, config)?;
    let mut app = TuiApp::new(config.shortcuts());

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    if terminal.size()?.width < NARROW_WIDTH {
        controller.switch_input_mode(InputMode::Keys);
    }

    let result = run_app(&mut terminal, &mut app, &mut controller).await;

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    controller.shutdown().await;
    info!("detached");
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut TuiApp,
    controller: &mut SessionController,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    loop {
        terminal.draw(|f| draw(f, app, controller, Instant::now()))?;

        // Run a queued bind now that "Binding..." is on screen
        if let Some(code) = app.take_pending_bind() {
            match controller.bind(&code).await {
                Ok(session) => app.set_status_success(format!("Bound to device {}", session.device_id)),
                Err(e) => app.set_status_error(format!("Bind failed: {}", e)),
            }
            continue;
        }

        let next = tokio::select! {
            update = controller.next_update() => Next::Update(update),
            event = events.next() => Next::Input(event),
            _ = tick.tick() => Next::Tick,
        };

        match next {
            Next::Update(update) => app.on_update(&update),
            Next::Input(Some(Ok(Event::Key(key)))) if key.kind == KeyEventKind::Press => {
                let mut event_handler = EventHandler::new(app, controller);
                if event_handler.handle_key_event(key).await? {
                    break;
                }
            }
            Next::Input(Some(Ok(_))) => {}
            Next::Input(Some(Err(e))) => return Err(e.into()),
            Next::Input(None) => break,
            Next::Tick => {}
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
