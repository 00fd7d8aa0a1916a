//! Text-to-speech through an external command (`espeak-ng`, `say`, …).
//!
//! Command-line engines cannot suspend mid-utterance, so `pause` kills the
//! running child and `resume` speaks the utterance again from the start.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use super::control::{wait_unpaused, Playback, PlaybackControl};
use super::{AdapterError, AdapterKind, SpeakOptions, Synthesizer};

/// Engine chosen when none is configured.
pub fn default_program() -> &'static str {
    if cfg!(target_os = "macos") {
        "say"
    } else {
        "espeak-ng"
    }
}

/// Locate `program` on `PATH` (or accept it as a path).
fn find_program(program: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(program);
    if direct.components().count() > 1 {
        return direct.is_file().then_some(direct);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{program}.exe"));
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

/// Argument list for one utterance.  Only `say` and the espeak family have
/// known voice/rate flags; any other program gets the text alone.
pub fn command_args(program: &str, text: &str, opts: &SpeakOptions) -> Vec<OsString> {
    let stem = std::path::Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program);

    let mut args: Vec<OsString> = Vec::new();
    match stem {
        "espeak" | "espeak-ng" => {
            if let Some(voice) = opts.voice.as_ref().or(opts.language.as_ref()) {
                args.extend(["-v".into(), voice.into()]);
            }
            if let Some(rate) = opts.rate_wpm {
                args.extend(["-s".into(), rate.to_string().into()]);
            }
        }
        "say" => {
            if let Some(voice) = &opts.voice {
                args.extend(["-v".into(), voice.into()]);
            }
            if let Some(rate) = opts.rate_wpm {
                args.extend(["-r".into(), rate.to_string().into()]);
            }
        }
        _ => {}
    }
    args.push(text.into());
    args
}

pub struct CommandSynthesizer {
    program: String,
    resolved: Option<PathBuf>,
    control: PlaybackControl,
}

impl CommandSynthesizer {
    /// `program` falls back to [`default_program`] when `None`.
    pub fn new(program: Option<String>) -> Self {
        let program = program.unwrap_or_else(|| default_program().to_string());
        let resolved = find_program(&program);
        if resolved.is_none() {
            log::warn!("synthesis: '{program}' not found on PATH");
        }
        Self {
            program,
            resolved,
            control: PlaybackControl::new(),
        }
    }

    fn command(&self, path: &PathBuf, text: &str, opts: &SpeakOptions) -> Command {
        let mut cmd = Command::new(path);
        cmd.args(command_args(&self.program, text, opts))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn exit_error(&self, status: ExitStatus) -> AdapterError {
        AdapterError::failed(
            AdapterKind::Synthesis,
            format!("{} exited with {status}", self.program),
        )
    }
}

#[async_trait]
impl Synthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str, opts: &SpeakOptions) -> Result<(), AdapterError> {
        let Some(path) = &self.resolved else {
            return Err(AdapterError::unavailable(
                AdapterKind::Synthesis,
                format!("'{}' not found", self.program),
            ));
        };

        let (id, mut rx) = self.control.begin();
        loop {
            if wait_unpaused(&mut rx).await == Playback::Cancelled || !self.control.is_current(id) {
                return Ok(());
            }

            log::debug!("synthesis: speaking {} chars", text.chars().count());
            let mut child = self.command(path, text, opts).spawn().map_err(|e| {
                AdapterError::failed(AdapterKind::Synthesis, format!("spawn {}: {e}", self.program))
            })?;

            tokio::select! {
                status = child.wait() => {
                    let status = status
                        .map_err(|e| AdapterError::failed(AdapterKind::Synthesis, e.to_string()))?;
                    return if status.success() {
                        Ok(())
                    } else {
                        Err(self.exit_error(status))
                    };
                }
                _ = rx.changed() => {
                    // Paused or cancelled: the utterance restarts from the top
                    // on resume.
                    if let Err(e) = child.kill().await {
                        log::warn!("synthesis: kill failed: {e}");
                    }
                }
            }
        }
    }

    fn pause(&self) {
        self.control.pause();
    }

    fn resume(&self) {
        self.control.resume();
    }

    fn cancel(&self) {
        self.control.cancel();
    }

    fn is_available(&self) -> bool {
        self.resolved.is_some()
    }
}
