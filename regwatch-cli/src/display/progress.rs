//! Batch progress bar that log lines can print around.
//!
//! While a [`BatchProgress`] is alive, tracing output written through
//! [`LogWriterFactory`] goes through the bar's `println` so the bar is
//! redrawn below it instead of being torn apart.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use regwatch_core::bulk::ProgressCallback;

static ACTIVE_BAR: Mutex<Option<ProgressBar>> = Mutex::new(None);

fn set_active_bar(bar: Option<ProgressBar>) {
    *ACTIVE_BAR.lock().unwrap_or_else(PoisonError::into_inner) = bar;
}

fn active_bar() -> Option<ProgressBar> {
    ACTIVE_BAR
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Progress over the domains of one batch, drawn on stderr.
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    /// Starts a bar for `total` domains. With `visible` false the bar
    /// is never drawn but the callback still works.
    pub fn start(total: usize, visible: bool) -> Self {
        let bar = ProgressBar::with_draw_target(
            Some(total as u64),
            if visible {
                ProgressDrawTarget::stderr()
            } else {
                ProgressDrawTarget::hidden()
            },
        );
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("█▓░"));
        }
        if visible {
            set_active_bar(Some(bar.clone()));
        }
        Self { bar }
    }

    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Box::new(move |done, _total, domain| {
            bar.set_position(done as u64);
            bar.set_message(domain.to_string());
        })
    }
}

impl Drop for BatchProgress {
    fn drop(&mut self) {
        set_active_bar(None);
        self.bar.finish_and_clear();
    }
}

/// Line-buffered writer that prints through the active bar, or to stderr.
pub struct LogWriter {
    buffer: Vec<u8>,
}

impl LogWriter {
    fn emit(line: &str) -> std::io::Result<()> {
        match active_bar() {
            Some(bar) => {
                bar.println(line);
                Ok(())
            }
            None => {
                let mut stderr = std::io::stderr().lock();
                stderr.write_all(line.as_bytes())?;
                stderr.write_all(b"\n")
            }
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            Self::emit(text.trim_end_matches(['\r', '\n']))?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.buffer).trim_end().to_string();
        self.buffer.clear();
        if text.is_empty() {
            return Ok(());
        }
        Self::emit(&text)
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// `MakeWriter` handing out [`LogWriter`]s to the fmt subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriterFactory;

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter { buffer: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test only: the active bar is process-global.
    #[test]
    fn test_active_bar_lifecycle() {
        let hidden = BatchProgress::start(2, false);
        (hidden.callback())(2, 2, "example.org");
        assert_eq!(hidden.bar.position(), 2);
        assert!(active_bar().is_none());
        drop(hidden);

        {
            let progress = BatchProgress::start(3, true);
            assert!(active_bar().is_some());
            (progress.callback())(1, 3, "example.com");
            assert_eq!(progress.bar.position(), 1);
            assert_eq!(progress.bar.message(), "example.com");
        }
        assert!(active_bar().is_none());
    }
}
