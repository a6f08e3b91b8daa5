use anyhow::Result;

use super::{validate_coordinates, GeoFix, GeoLocationProvider, ProviderKind};

/// Always returns the configured coordinates. Used for offline replay.
#[derive(Clone, Debug)]
pub struct StaticLocationProvider {
    latitude: f64,
    longitude: f64,
}

impl StaticLocationProvider {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl GeoLocationProvider for StaticLocationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Static
    }

    fn resolve(&mut self) -> GeoFix {
        GeoFix::at(ProviderKind::Static, self.latitude, self.longitude)
    }
}
