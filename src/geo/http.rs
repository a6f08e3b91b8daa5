use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

use super::{validate_coordinates, GeoFix, GeoLocationProvider, ProviderKind};

pub const DEFAULT_IP_GEOLOCATION_URL: &str = "https://ipinfo.io/json";

/// Coarse position from an IP geolocation endpoint.
///
/// One GET per `resolve()`, bounded by the agent timeout. Any transport
/// error, non-2xx status or malformed body yields an absent fix.
pub struct HttpIpLocationProvider {
    agent: ureq::Agent,
    url: String,
}

#[derive(Debug, Deserialize)]
struct IpInfoBody {
    loc: String,
}

impl HttpIpLocationProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).context("parse ip geolocation url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "unsupported ip geolocation scheme '{}'; expected http(s)",
                parsed.scheme()
            );
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            url: url.to_string(),
        })
    }

    fn fetch(&self) -> Result<(f64, f64)> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("GET {}", self.url))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            bail!("ip geolocation returned status {}", status);
        }
        let body = response
            .into_string()
            .context("read ip geolocation response")?;
        parse_ip_location(&body)
    }
}

/// Extracts the `"loc": "lat,lon"` field from an ipinfo-style body.
pub fn parse_ip_location(body: &str) -> Result<(f64, f64)> {
    static LOC_RE: OnceLock<Regex> = OnceLock::new();
    let re = LOC_RE.get_or_init(|| {
        Regex::new(r"^\s*([+-]?\d+(?:\.\d+)?)\s*,\s*([+-]?\d+(?:\.\d+)?)\s*$")
            .expect("loc regex is valid")
    });

    let parsed: IpInfoBody =
        serde_json::from_str(body).map_err(|e| anyhow!("invalid ip geolocation body: {}", e))?;
    let caps = re
        .captures(&parsed.loc)
        .ok_or_else(|| anyhow!("malformed loc field '{}'", parsed.loc))?;
    let latitude: f64 = caps[1].parse()?;
    let longitude: f64 = caps[2].parse()?;
    validate_coordinates(latitude, longitude)?;
    Ok((latitude, longitude))
}

impl GeoLocationProvider for HttpIpLocationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HttpIp
    }

    fn resolve(&mut self) -> GeoFix {
        match self.fetch() {
            Ok((latitude, longitude)) => GeoFix::at(ProviderKind::HttpIp, latitude, longitude),
            Err(e) => {
                log::warn!("ip geolocation failed: {:#}", e);
                GeoFix::absent(ProviderKind::HttpIp)
            }
        }
    }
}
