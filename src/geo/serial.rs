//! GPS receiver over a serial line.
//!
//! Reads NMEA lines, skips everything that is not a GGA sentence and parses
//! the first one found. Each `resolve()` reads at most `max_lines` lines and
//! gives up after `timeout`; a parse or read failure yields an absent fix.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use super::nmea::{is_gga, parse_gga};
use super::{validate_coordinates, GeoFix, GeoLocationProvider, ProviderKind};
use crate::config::SerialSettings;

/// Port prefix that replays a captured NMEA log instead of opening a device.
pub const REPLAY_PREFIX: &str = "replay://";

pub struct SerialNmeaLocationProvider {
    reader: Box<dyn BufRead + Send>,
    label: String,
    max_lines: usize,
    timeout: Duration,
}

impl SerialNmeaLocationProvider {
    pub fn from_reader(
        reader: impl BufRead + Send + 'static,
        label: &str,
        max_lines: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            label: label.to_string(),
            max_lines: max_lines.max(1),
            timeout,
        }
    }

    /// Open the configured receiver.
    ///
    /// `replay://<path>` reads a captured NMEA log from disk; anything else is
    /// a serial device and requires the `gps-serial` feature.
    pub fn open(settings: &SerialSettings) -> Result<Self> {
        if let Some(path) = settings.port.strip_prefix(REPLAY_PREFIX) {
            let file = std::fs::File::open(path)
                .with_context(|| format!("open nmea replay {}", path))?;
            log::info!("SerialNmea: replaying {}", path);
            return Ok(Self::from_reader(
                BufReader::new(file),
                &settings.port,
                settings.max_lines,
                settings.timeout,
            ));
        }

        #[cfg(feature = "gps-serial")]
        {
            let port = serialport::new(&settings.port, settings.baud_rate)
                .timeout(settings.read_timeout)
                .open()
                .with_context(|| format!("open gps serial port {}", settings.port))?;
            log::info!(
                "SerialNmea: connected to {} at {} baud",
                settings.port,
                settings.baud_rate
            );
            Ok(Self::from_reader(
                BufReader::new(port),
                &settings.port,
                settings.max_lines,
                settings.timeout,
            ))
        }
        #[cfg(not(feature = "gps-serial"))]
        {
            anyhow::bail!(
                "serial gps port {} requires the gps-serial feature",
                settings.port
            )
        }
    }

    fn read_fix(&mut self) -> Result<Option<(f64, f64)>> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = Vec::with_capacity(128);
        for _ in 0..self.max_lines {
            if Instant::now() >= deadline {
                log::warn!("no GGA sentence from {} within {:?}", self.label, self.timeout);
                return Ok(None);
            }
            buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut buf)
                .with_context(|| format!("read nmea line from {}", self.label))?;
            if read == 0 {
                log::warn!("gps receiver {} closed the stream", self.label);
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&buf);
            if !is_gga(&line) {
                continue;
            }
            let fix = parse_gga(&line)?;
            validate_coordinates(fix.latitude, fix.longitude)?;
            return Ok(Some((fix.latitude, fix.longitude)));
        }
        log::warn!(
            "no GGA sentence in {} lines from {}",
            self.max_lines,
            self.label
        );
        Ok(None)
    }
}

impl GeoLocationProvider for SerialNmeaLocationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::SerialNmea
    }

    fn resolve(&mut self) -> GeoFix {
        match self.read_fix() {
            Ok(Some((latitude, longitude))) => {
                GeoFix::at(ProviderKind::SerialNmea, latitude, longitude)
            }
            Ok(None) => GeoFix::absent(ProviderKind::SerialNmea),
            Err(e) => {
                log::warn!("gps read failed: {:#}", e);
                GeoFix::absent(ProviderKind::SerialNmea)
            }
        }
    }
}
