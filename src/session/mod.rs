//! The drill session: state machine, phases, timer and public API.
//!
//! ```text
//! SessionFactory::create(level)
//!   └─▶ (Session, SessionEvents)
//!         start(prompt) ─▶ Prompt ─▶ Cue ─▶ Recording ─▶ Processing ─▶ Idle
//!                                              └──────▶ Timeout ─────▶ Idle
//! ```
//!
//! ```rust,no_run
//! use speech_drill::config::AppConfig;
//! use speech_drill::session::{DifficultyLevel, SessionEvent, SessionFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = SessionFactory::from_config(&AppConfig::load()?);
//! let (session, mut events) = factory.create(DifficultyLevel::Beginner)?;
//! session.start("안녕하세요")?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Result(result) = event {
//!         println!("{}", result.transcript);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod events;
pub mod factory;
pub mod machine;
pub mod orchestrator;
pub mod state;
pub mod timer;

mod phase;
mod run;

pub use events::{
    ErrorCode, EventSink, SessionError, SessionEvent, SessionEvents, SessionResult, Severity,
};
pub use factory::{DifficultyLevel, SessionConfig, SessionFactory};
pub use machine::StateMachine;
pub use orchestrator::Session;
pub use state::{
    allowed_actions, display_info, transition, Action, DisplayInfo, FlowState, StateContext,
    TransitionRule, TRANSITION_RULES,
};
pub use timer::{CountdownTimer, TICK_INTERVAL};
