//! Accumulates interpolation-phase problems without aborting mid-render.
//!
//! Ported from `error_report.py`'s `ErrorReport`/`ErrorLevel`: every message
//! is logged immediately through the `log` facade (rather than printed to
//! stderr directly, as the original does) and also kept so the driver can
//! decide whether to fail the whole run once rendering finishes.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorLevel {
    Info,
    Warn,
    Error,
}

impl Display for ErrorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorLevel::Info => "INFO",
            ErrorLevel::Warn => "WARN",
            ErrorLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct ErrorReport {
    messages: Vec<(ErrorLevel, String)>,
    max_level: Option<ErrorLevel>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, msg: impl Into<String>) {
        self.show(ErrorLevel::Info, msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.show(ErrorLevel::Warn, msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.show(ErrorLevel::Error, msg.into());
    }

    fn show(&mut self, level: ErrorLevel, msg: String) {
        match level {
            ErrorLevel::Info => log::info!("{msg}"),
            ErrorLevel::Warn => log::warn!("{msg}"),
            ErrorLevel::Error => log::error!("{msg}"),
        }
        self.max_level = Some(self.max_level.map_or(level, |current| current.max(level)));
        self.messages.push((level, msg));
    }

    pub fn max_level(&self) -> Option<ErrorLevel> {
        self.max_level
    }

    pub fn messages(&self) -> &[(ErrorLevel, String)] {
        &self.messages
    }

    /// Mirrors `exit_on_error`: fails once anything at `Error` level has been
    /// recorded. `Warn`-level messages are reported but never fail the run.
    pub fn into_result(self) -> Result<Self, String> {
        if self.max_level == Some(ErrorLevel::Error) {
            let joined = self
                .messages
                .iter()
                .map(|(level, msg)| format!("{level}: {msg}"))
                .collect::<Vec<_>>()
                .join("\n");
            Err(joined)
        } else {
            Ok(self)
        }
    }
}
