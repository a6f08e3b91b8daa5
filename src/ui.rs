// Shared by the binaries through `#[path]`; not part of the library.

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    /// Spinners only when stderr is a terminal; `Auto` also backs off when
    /// stdout is redirected so piped reports stay clean.
    pub fn new(mode: UiMode) -> Self {
        let stderr_tty = std::io::stderr().is_terminal();
        let stdout_tty = std::io::stdout().is_terminal();
        let pretty = stderr_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_tty,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    // only the tagger reports progress details
    #[allow(dead_code)]
    last_plain: Instant,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        let now = Instant::now();
        Self {
            name,
            start: now,
            spinner,
            last_plain: now,
        }
    }

    /// Progress detail. Plain mode prints at most every five seconds.
    #[allow(dead_code)]
    pub fn set_detail(&mut self, detail: &str) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(format!("{}… {}", self.name, detail)),
            None => {
                if self.last_plain.elapsed() >= Duration::from_secs(5) {
                    eprintln!("    {}: {}", self.name, detail);
                    self.last_plain = Instant::now();
                }
            }
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
