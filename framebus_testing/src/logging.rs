//! Shared `log` capture for tests.
//!
//! `logtest` installs one global logger per process, so every test that
//! inspects log output goes through [`LoggerHandle`], which serializes access
//! and starts each test from an empty buffer.

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::Level;
use logtest::Logger;
use rstest::fixture;

/// Exclusive handle to the process-wide [`Logger`].
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the logger and discard records left by earlier tests.
    #[must_use]
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let mut guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
        while guard.pop().is_some() {}
        Self { guard }
    }

    /// Remove and return every captured record as `(level, message)`.
    pub fn drain(&mut self) -> Vec<(Level, String)> {
        std::iter::from_fn(|| self.guard.pop())
            .map(|record| (record.level(), record.args().to_owned()))
            .collect()
    }

    /// Drain the buffer and report whether any record at `level` contains
    /// `fragment`.
    pub fn contains(&mut self, level: Level, fragment: &str) -> bool {
        self.drain()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(fragment))
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
