use anyhow::{Context, Result};
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

/// Character that ends the run.
pub const QUIT_KEY: char = 'q';

/// Operator stop channel, polled once per frame.
pub trait StopSignal {
    /// Next pending command character, if any. Never blocks.
    fn poll(&mut self) -> Option<char>;
}

impl StopSignal for Box<dyn StopSignal> {
    fn poll(&mut self) -> Option<char> {
        (**self).poll()
    }
}

/// First pending command from any of the inner signals.
impl StopSignal for Vec<Box<dyn StopSignal>> {
    fn poll(&mut self) -> Option<char> {
        self.iter_mut().find_map(|signal| signal.poll())
    }
}

#[derive(Debug, Default)]
pub struct NeverStop;

impl StopSignal for NeverStop {
    fn poll(&mut self) -> Option<char> {
        None
    }
}

/// Maps SIGINT/SIGTERM to the quit key.
pub struct CtrlCStop {
    rx: Receiver<()>,
}

impl CtrlCStop {
    /// Installs the process-wide handler. Only one may exist per process.
    pub fn install() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .context("install ctrl-c handler")?;
        Ok(Self { rx })
    }
}

impl StopSignal for CtrlCStop {
    fn poll(&mut self) -> Option<char> {
        match self.rx.try_recv() {
            Ok(()) => Some(QUIT_KEY),
            Err(_) => None,
        }
    }
}

/// Reads command lines on a background thread; the first character of each
/// non-empty line is one command.
pub struct StdinStop {
    rx: Receiver<char>,
}

impl StdinStop {
    pub fn spawn() -> Self {
        Self::from_reader(std::io::BufReader::new(std::io::stdin()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if let Some(c) = line.trim().chars().next() {
                    if tx.send(c).is_err() {
                        break;
                    }
                }
            }
        });
        Self { rx }
    }
}

impl StopSignal for StdinStop {
    fn poll(&mut self) -> Option<char> {
        match self.rx.try_recv() {
            Ok(c) => Some(c),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
