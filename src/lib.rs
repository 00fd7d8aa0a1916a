//! speech-drill: timed spoken-answer drills.
//!
//! A [`session::Session`] reads a prompt aloud, gives the learner time to
//! think, plays a cue tone, records and transcribes the spoken answer, and
//! reports the transcript.  Hardware and engines sit behind the traits in
//! [`adapters`]; the rest of the crate never touches a device directly.

pub mod adapters;
pub mod audio;
pub mod config;
pub mod session;
pub mod stt;
