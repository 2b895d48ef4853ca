//! ScrollStep - menu bar utility that pins wheel scrolling to a fixed line
//! count.
//!
//! The main thread owns the supervisor and the menu; a background worker
//! owns the event tap. Everything the user can do arrives here as a menu
//! event or a Ctrl-C.

#[cfg(target_os = "macos")]
mod app {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tray_icon::menu::MenuEvent;

    use scrollstep::macos::{runloop, WheelTapSource};
    use scrollstep::scroll::LineStep;
    use scrollstep::supervisor::{TapSupervisor, Toggle};
    use scrollstep::tray::{self, TrayMenu, MENU_ID_QUIT, MENU_ID_TOGGLE};

    pub fn run() -> Result<(), Box<dyn std::error::Error>> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scrollstep=info")),
            )
            .init();

        runloop::register_main();

        let mut step = LineStep::default();
        let mut supervisor = TapSupervisor::new(WheelTapSource::new());

        // Interception is on from launch when the hook is available; a
        // denied hook leaves the app running with the toggle off.
        let active = match supervisor.start(step) {
            Ok(worker) => {
                tracing::info!(%worker, lines = step.lines(), "scroll interception on");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "scroll interception unavailable at launch");
                false
            }
        };

        let menu = tray::setup_tray(step, active)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_ctrlc = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown_ctrlc.store(true, Ordering::SeqCst);
            runloop::post_quit();
        })?;

        let receiver = MenuEvent::receiver();
        while !shutdown.load(Ordering::SeqCst) {
            runloop::pump(Duration::from_millis(100));
            while let Ok(event) = receiver.try_recv() {
                handle_menu_event(&event.id.0, &mut supervisor, &mut step, &menu, &shutdown);
            }
        }

        if let Err(e) = supervisor.stop() {
            tracing::error!(error = %e, "worker did not shut down cleanly");
        }
        tracing::info!("scrollstep exited");
        Ok(())
    }

    fn handle_menu_event(
        menu_id: &str,
        supervisor: &mut TapSupervisor<WheelTapSource>,
        step: &mut LineStep,
        menu: &TrayMenu,
        shutdown: &AtomicBool,
    ) {
        match menu_id {
            MENU_ID_TOGGLE => match supervisor.toggle(*step) {
                Ok(Toggle::Started(worker)) => {
                    tracing::info!(%worker, lines = step.lines(), "scroll interception on");
                    menu.set_active(true);
                }
                Ok(Toggle::Stopped) => {
                    tracing::info!("scroll interception off");
                    menu.set_active(false);
                }
                Err(e) => {
                    tracing::error!(error = %e, "toggle failed");
                    menu.set_active(supervisor.is_running());
                }
            },
            MENU_ID_QUIT => {
                tracing::info!("quit requested from menu");
                shutdown.store(true, Ordering::SeqCst);
            }
            other => match tray::line_count(other) {
                Some(lines) => {
                    *step = LineStep::new(lines);
                    menu.select_lines(step.lines());
                    tracing::info!(lines = step.lines(), "line count selected");
                }
                None => {
                    tracing::debug!(menu_id = other, "unknown menu event");
                }
            },
        }
    }
}

#[cfg(target_os = "macos")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    app::run()
}

#[cfg(not(target_os = "macos"))]
fn main() {
    eprintln!("scrollstep drives a macOS event tap and only runs on macOS");
    std::process::exit(1);
}
