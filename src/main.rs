//! Application entry point: speech-drill.
//!
//! ```text
//! speech-drill [--level beginner|intermediate|advanced] PROMPT[=ANSWER]...
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk, writing the defaults on first run.
//! 3. Create the [`tokio`] runtime.
//! 4. Build the production adapters and check host capabilities.
//! 5. Run one session per prompt, printing its events.  Ctrl-C stops the
//!    running session and exits.

use std::io::Write;

use anyhow::{bail, Context, Result};
use speech_drill::{
    config::AppConfig,
    session::{DifficultyLevel, Session, SessionEvent, SessionEvents, SessionFactory},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

struct Drill {
    prompt: String,
    answer: Option<String>,
}

struct Args {
    level: Option<DifficultyLevel>,
    drills: Vec<Drill>,
}

const USAGE: &str = "usage: speech-drill [--level beginner|intermediate|advanced] PROMPT[=ANSWER]...";

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut level = None;
    let mut drills = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if arg == "--level" || arg == "-l" {
            let value = args.next().context("--level needs a value")?;
            level = Some(value.parse::<DifficultyLevel>().map_err(anyhow::Error::msg)?);
        } else if let Some(value) = arg.strip_prefix("--level=") {
            level = Some(value.parse::<DifficultyLevel>().map_err(anyhow::Error::msg)?);
        } else if arg == "--help" || arg == "-h" {
            bail!(USAGE);
        } else {
            let (prompt, answer) = match arg.split_once('=') {
                Some((prompt, answer)) => (prompt.to_string(), Some(answer.to_string())),
                None => (arg, None),
            };
            drills.push(Drill { prompt, answer });
        }
    }

    if drills.is_empty() {
        bail!(USAGE);
    }
    Ok(Args { level, drills })
}

// ---------------------------------------------------------------------------
// Running a drill
// ---------------------------------------------------------------------------

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => println!("\n[{state}] {}", state.description()),
        SessionEvent::TimeUpdate { remaining_secs } => {
            print!("\r  {remaining_secs:>5.1}s ");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::Result(result) => {
            println!(
                "\n  heard: \"{}\" (confidence {:.0}%, {:.1}s)",
                result.transcript,
                result.confidence * 100.0,
                result.elapsed.as_secs_f32()
            );
        }
        SessionEvent::Error(err) => eprintln!("\n  error: {err}"),
        SessionEvent::Timeout => println!("\n  time is up"),
    }
}

/// Run one drill to completion.  Returns `false` if interrupted.
async fn run_drill(session: &Session, events: &mut SessionEvents, drill: &Drill) -> Result<bool> {
    session.start_with_answer(&drill.prompt, drill.answer.as_deref())?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("session closed unexpectedly");
                };
                print_event(&event);
                if matches!(event, SessionEvent::StateChanged(state) if !state.is_active()) {
                    return Ok(true);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                session.stop();
                return Ok(false);
            }
        }
    }
}

async fn run(args: Args, config: AppConfig) -> Result<()> {
    let level = args.level.unwrap_or(config.session.difficulty);
    let factory = SessionFactory::from_config(&config);
    let (session, mut events) = factory.create(level)?;
    log::info!("{level} drills: {}", args.drills.len());

    for drill in &args.drills {
        if !run_drill(&session, &mut events, drill).await? {
            break;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args(std::env::args().skip(1))?;

    // 2. Configuration (written out with defaults on first run)
    let config = if AppConfig::is_first_run() {
        let config = AppConfig::default();
        match config.save() {
            Ok(()) => log::info!("First run: wrote default settings.toml"),
            Err(e) => log::warn!("Failed to write default config: {e}"),
        }
        config
    } else {
        AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        })
    };

    // 3. Tokio runtime (2 workers: session driver and Whisper on the blocking pool)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4-5. Adapters, capability check, drills
    rt.block_on(run(args, config))
}
