//! Geolocation resolution.
//!
//! Every source implements `GeoLocationProvider`. `resolve()` may block, but
//! only for a bounded, provider-specific time, and it never fails: internal
//! errors are logged and turned into an absent `GeoFix`.
//!
//! Providers:
//! - `PolledDeviceLocationProvider`: platform location service with accuracy escalation
//! - `SerialNmeaLocationProvider`: GGA sentences from a GPS receiver
//! - `HttpIpLocationProvider`: IP geolocation endpoint
//! - `StaticLocationProvider`: fixed coordinates (replay, tests)
//! - `CachedLocationProvider`: background refresh around any of the above

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod cached;
mod fixed;
mod http;
pub mod nmea;
mod polled;
mod serial;

pub use cached::CachedLocationProvider;
pub use fixed::StaticLocationProvider;
pub use http::{parse_ip_location, HttpIpLocationProvider, DEFAULT_IP_GEOLOCATION_URL};
pub use polled::{
    AccuracyEscalation, CommandLocationService, LocationService, Permission,
    PolledDeviceLocationProvider, ReplayLocationService, ServiceSnapshot, ServiceStatus,
};
pub use serial::SerialNmeaLocationProvider;

use crate::config::{GeoSettings, ProviderChoice};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Device,
    SerialNmea,
    HttpIp,
    Static,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Device => "device",
            ProviderKind::SerialNmea => "serial_nmea",
            ProviderKind::HttpIp => "http_ip",
            ProviderKind::Static => "static",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved or explicitly absent coordinate pair.
///
/// Latitude and longitude are either both present or both absent. Absent is
/// never encoded as `(0, 0)`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeoFix {
    latitude: Option<f64>,
    longitude: Option<f64>,
    pub source: ProviderKind,
    pub resolved_at: DateTime<Utc>,
}

impl GeoFix {
    pub fn at(source: ProviderKind, latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            source,
            resolved_at: Utc::now(),
        }
    }

    pub fn absent(source: ProviderKind) -> Self {
        Self {
            latitude: None,
            longitude: None,
            source,
            resolved_at: Utc::now(),
        }
    }

    pub fn latitude(&self) -> Option<f64> {
        self.latitude
    }

    pub fn longitude(&self) -> Option<f64> {
        self.longitude
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    pub fn is_present(&self) -> bool {
        self.coordinates().is_some()
    }
}

pub trait GeoLocationProvider: Send {
    fn kind(&self) -> ProviderKind;

    /// Resolve the current position. Blocks for at most the provider's bound.
    fn resolve(&mut self) -> GeoFix;
}

impl GeoLocationProvider for Box<dyn GeoLocationProvider> {
    fn kind(&self) -> ProviderKind {
        (**self).kind()
    }

    fn resolve(&mut self) -> GeoFix {
        (**self).resolve()
    }
}

pub(crate) fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(anyhow!("latitude {} out of range", latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(anyhow!("longitude {} out of range", longitude));
    }
    Ok(())
}

/// Build the configured provider. Called once at startup.
///
/// A serial receiver that cannot be opened falls back to IP geolocation when
/// `serial.fallback_to_http` is set.
pub fn build_provider(settings: &GeoSettings) -> Result<Box<dyn GeoLocationProvider>> {
    let provider: Box<dyn GeoLocationProvider> = match settings.provider {
        ProviderChoice::Static => Box::new(StaticLocationProvider::new(
            settings.fixed.latitude,
            settings.fixed.longitude,
        )?),
        ProviderChoice::Http => Box::new(HttpIpLocationProvider::new(
            &settings.http.url,
            settings.http.timeout,
        )?),
        ProviderChoice::Device => {
            let program = settings
                .device
                .command
                .first()
                .ok_or_else(|| anyhow!("geo.device.command must name a location helper"))?;
            let service = CommandLocationService::new(program, &settings.device.command[1..]);
            Box::new(PolledDeviceLocationProvider::new(
                service,
                settings.device.clone(),
            ))
        }
        ProviderChoice::Serial => match SerialNmeaLocationProvider::open(&settings.serial) {
            Ok(provider) => Box::new(provider),
            Err(e) if settings.serial.fallback_to_http => {
                log::warn!(
                    "gps receiver {} unavailable ({:#}); falling back to ip geolocation",
                    settings.serial.port,
                    e
                );
                Box::new(HttpIpLocationProvider::new(
                    &settings.http.url,
                    settings.http.timeout,
                )?)
            }
            Err(e) => return Err(e),
        },
    };

    match &settings.cache {
        Some(cache) => Ok(Box::new(CachedLocationProvider::spawn(
            provider,
            cache.refresh_interval,
            cache.max_age,
        )?)),
        None => Ok(provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoSettings;

    #[test]
    fn absent_fix_is_not_zero() {
        let fix = GeoFix::absent(ProviderKind::HttpIp);
        assert!(!fix.is_present());
        assert_eq!(fix.latitude(), None);
        assert_eq!(fix.longitude(), None);
    }

    #[test]
    fn builds_static_provider_from_settings() {
        let mut settings = GeoSettings::default();
        settings.provider = ProviderChoice::Static;
        settings.fixed.latitude = 19.0760;
        settings.fixed.longitude = 72.8777;
        let mut provider = build_provider(&settings).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Static);
        assert_eq!(provider.resolve().coordinates(), Some((19.0760, 72.8777)));
    }

    #[test]
    fn device_provider_requires_a_command() {
        let mut settings = GeoSettings::default();
        settings.provider = ProviderChoice::Device;
        settings.device.command.clear();
        assert!(build_provider(&settings).is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(validate_coordinates(91.0, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.5).is_err());
        assert!(validate_coordinates(-90.0, 180.0).is_ok());
    }
}
