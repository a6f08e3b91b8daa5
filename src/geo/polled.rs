//! Platform location service polling with accuracy escalation.
//!
//! The provider starts the service, waits for it to become ready, then keeps
//! polling until the reported horizontal accuracy meets a threshold that is
//! relaxed by 1.5x on every miss. Since the threshold grows by at least 1 m
//! on each iteration, the wait ends for any bounded accuracy reading.
//! Permission denial ends the wait immediately, and every snapshot is bounded
//! by the same deadline as the whole wait.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{validate_coordinates, GeoFix, GeoLocationProvider, ProviderKind};
use crate::config::DeviceSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceStatus {
    NotReady,
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Unknown,
    Granted,
    Denied,
}

/// One reading of the location service's state.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSnapshot {
    pub status: ServiceStatus,
    pub permission: Permission,
    /// Horizontal accuracy radius in meters, when the service reports one.
    pub accuracy_m: Option<f64>,
    pub coordinates: Option<(f64, f64)>,
}

impl ServiceSnapshot {
    pub fn not_ready() -> Self {
        Self {
            status: ServiceStatus::NotReady,
            permission: Permission::Unknown,
            accuracy_m: None,
            coordinates: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: Permission::Denied,
            ..Self::not_ready()
        }
    }

    pub fn ready(latitude: f64, longitude: f64, accuracy_m: f64) -> Self {
        Self {
            status: ServiceStatus::Ready,
            permission: Permission::Granted,
            accuracy_m: Some(accuracy_m),
            coordinates: Some((latitude, longitude)),
        }
    }
}

/// Platform location service boundary.
pub trait LocationService: Send {
    fn start(&mut self) -> Result<()>;

    /// Reads the current state. Must return, with an error if need be, by
    /// `deadline`.
    fn snapshot(&mut self, deadline: Instant) -> Result<ServiceSnapshot>;

    fn stop(&mut self);
}

/// Accuracy threshold that relaxes on every miss.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccuracyEscalation {
    threshold_m: f64,
    factor: f64,
}

impl AccuracyEscalation {
    /// The starting threshold is rounded and clamped to at least 1 m.
    pub fn new(desired_accuracy_m: f64, factor: f64) -> Self {
        Self {
            threshold_m: desired_accuracy_m.round_ties_even().max(1.0),
            factor: factor.max(1.0),
        }
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// A missing accuracy reading never satisfies the threshold.
    pub fn accepts(&self, accuracy_m: Option<f64>) -> bool {
        accuracy_m.is_some_and(|acc| acc <= self.threshold_m)
    }

    /// Scales and rounds half-to-even, growing by at least 1 m per step.
    pub fn relax(&mut self) {
        let scaled = (self.threshold_m * self.factor).round_ties_even();
        self.threshold_m = scaled.max(self.threshold_m + 1.0);
    }
}

pub struct PolledDeviceLocationProvider<S: LocationService> {
    service: S,
    settings: DeviceSettings,
}

impl<S: LocationService> PolledDeviceLocationProvider<S> {
    pub fn new(service: S, settings: DeviceSettings) -> Self {
        Self { service, settings }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    fn poll(&mut self, deadline: Instant) -> Result<ServiceSnapshot> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(self.settings.poll_interval.min(remaining));
        self.service.snapshot(deadline)
    }

    fn wait_for_fix(&mut self) -> Result<Option<(f64, f64)>> {
        self.service.start().context("start location service")?;
        let deadline = Instant::now() + self.settings.timeout;

        let mut snapshot = self.service.snapshot(deadline)?;
        while snapshot.status != ServiceStatus::Ready {
            if snapshot.permission == Permission::Denied {
                log::warn!("location permission denied");
                return Ok(None);
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "location service not ready after {:?}",
                    self.settings.timeout
                );
                return Ok(None);
            }
            snapshot = self.poll(deadline)?;
        }

        let mut escalation =
            AccuracyEscalation::new(self.settings.desired_accuracy_m, self.settings.relax_factor);
        while !escalation.accepts(snapshot.accuracy_m) {
            if snapshot.permission == Permission::Denied {
                log::warn!("location permission revoked while refining accuracy");
                return Ok(None);
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "location accuracy {:?} m never met relaxed threshold {} m",
                    snapshot.accuracy_m,
                    escalation.threshold_m()
                );
                return Ok(None);
            }
            snapshot = self.poll(deadline)?;
            escalation.relax();
        }

        let (latitude, longitude) = snapshot
            .coordinates
            .ok_or_else(|| anyhow!("ready location service reported no coordinates"))?;
        validate_coordinates(latitude, longitude)?;
        log::debug!(
            "device fix {:.6},{:.6} accuracy={:?}m threshold={}m",
            latitude,
            longitude,
            snapshot.accuracy_m,
            escalation.threshold_m()
        );
        Ok(Some((latitude, longitude)))
    }
}

impl<S: LocationService> GeoLocationProvider for PolledDeviceLocationProvider<S> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Device
    }

    fn resolve(&mut self) -> GeoFix {
        let result = self.wait_for_fix();
        self.service.stop();
        match result {
            Ok(Some((latitude, longitude))) => GeoFix::at(ProviderKind::Device, latitude, longitude),
            Ok(None) => GeoFix::absent(ProviderKind::Device),
            Err(e) => {
                log::warn!("device location failed: {:#}", e);
                GeoFix::absent(ProviderKind::Device)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Replay service (scripted snapshots)
// ----------------------------------------------------------------------------

/// Plays back a scripted sequence of snapshots. The last one repeats.
#[derive(Clone, Debug, Default)]
pub struct ReplayLocationService {
    script: VecDeque<ServiceSnapshot>,
    last: Option<ServiceSnapshot>,
    pub starts: u32,
    pub stops: u32,
    pub polls: u32,
}

impl ReplayLocationService {
    pub fn new(script: impl IntoIterator<Item = ServiceSnapshot>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl LocationService for ReplayLocationService {
    fn start(&mut self) -> Result<()> {
        self.starts += 1;
        Ok(())
    }

    fn snapshot(&mut self, _deadline: Instant) -> Result<ServiceSnapshot> {
        self.polls += 1;
        if let Some(next) = self.script.pop_front() {
            self.last = Some(next);
        }
        self.last
            .clone()
            .ok_or_else(|| anyhow!("replay location service has an empty script"))
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}

// ----------------------------------------------------------------------------
// Command-backed service
// ----------------------------------------------------------------------------

/// How often a running helper is checked for exit.
const HELPER_WAIT_STEP: Duration = Duration::from_millis(10);

/// Bridges to a platform helper program.
///
/// The helper is run once per poll; one still running at the deadline is
/// killed. It must print a single line of
/// `key=value` pairs: `status=ready permission=granted accuracy=12 lat=19.07 lon=72.87`.
/// `status` is `ready` or anything else; `permission` is `granted`, `denied`
/// or `unknown`.
pub struct CommandLocationService {
    program: String,
    args: Vec<String>,
}

impl CommandLocationService {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }
}

impl LocationService for CommandLocationService {
    fn start(&mut self) -> Result<()> {
        log::debug!("location helper: {} {:?}", self.program, self.args);
        Ok(())
    }

    fn snapshot(&mut self, deadline: Instant) -> Result<ServiceSnapshot> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("run location helper {}", self.program))?;

        let status = loop {
            if let Some(status) = child.try_wait().context("wait for location helper")? {
                break status;
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    log::debug!("kill location helper: {}", e);
                }
                let _ = child.wait();
                bail!("location helper {} did not answer in time", self.program);
            }
            std::thread::sleep(HELPER_WAIT_STEP);
        };
        if !status.success() {
            bail!("location helper exited with {}", status);
        }

        let mut raw = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_end(&mut raw)
                .context("read location helper output")?;
        }
        let stdout = String::from_utf8_lossy(&raw);
        let line = stdout
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| anyhow!("location helper printed nothing"))?;
        parse_snapshot_line(line)
    }

    fn stop(&mut self) {}
}

pub(crate) fn parse_snapshot_line(line: &str) -> Result<ServiceSnapshot> {
    let mut snapshot = ServiceSnapshot::not_ready();
    let mut lat = None;
    let mut lon = None;
    for pair in line.split_whitespace() {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed helper field '{}'", pair))?;
        match key {
            "status" => {
                snapshot.status = if value.eq_ignore_ascii_case("ready") {
                    ServiceStatus::Ready
                } else {
                    ServiceStatus::NotReady
                }
            }
            "permission" => {
                snapshot.permission = match value.to_ascii_lowercase().as_str() {
                    "granted" => Permission::Granted,
                    "denied" => Permission::Denied,
                    _ => Permission::Unknown,
                }
            }
            "accuracy" => snapshot.accuracy_m = Some(parse_number(key, value)?),
            "lat" => lat = Some(parse_number(key, value)?),
            "lon" => lon = Some(parse_number(key, value)?),
            _ => {}
        }
    }
    snapshot.coordinates = lat.zip(lon);
    Ok(snapshot)
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| anyhow!("helper field {} is not a number: '{}'", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_settings() -> DeviceSettings {
        DeviceSettings {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
            ..DeviceSettings::default()
        }
    }

    #[test]
    fn escalation_is_strictly_increasing() {
        let mut esc = AccuracyEscalation::new(1.0, 1.5);
        let mut prev = esc.threshold_m();
        for _ in 0..40 {
            esc.relax();
            assert!(esc.threshold_m() > prev);
            prev = esc.threshold_m();
        }
    }

    #[test]
    fn escalation_rounds_half_to_even() {
        let mut esc = AccuracyEscalation::new(3.0, 1.5);
        esc.relax();
        assert_eq!(esc.threshold_m(), 4.0);
        esc.relax();
        assert_eq!(esc.threshold_m(), 6.0);
        esc.relax();
        assert_eq!(esc.threshold_m(), 9.0);
    }

    #[test]
    fn sub_meter_start_is_clamped() {
        let mut esc = AccuracyEscalation::new(0.2, 1.5);
        assert_eq!(esc.threshold_m(), 1.0);
        esc.relax();
        assert_eq!(esc.threshold_m(), 2.0);
    }

    #[test]
    fn small_factor_still_grows_every_step() {
        let mut esc = AccuracyEscalation::new(2.0, 1.2);
        esc.relax();
        assert_eq!(esc.threshold_m(), 3.0);
        esc.relax();
        assert_eq!(esc.threshold_m(), 4.0);
        esc.relax();
        assert_eq!(esc.threshold_m(), 5.0);
    }

    #[test]
    fn small_factor_provider_terminates_without_the_timeout() {
        let service = ReplayLocationService::new(vec![ServiceSnapshot::ready(1.0, 2.0, 5.0)]);
        let settings = DeviceSettings {
            desired_accuracy_m: 2.0,
            relax_factor: 1.2,
            ..fast_settings()
        };
        let mut provider = PolledDeviceLocationProvider::new(service, settings);
        assert!(provider.resolve().is_present());
        // 2 -> 3 -> 4 -> 5
        assert_eq!(provider.service().polls, 4);
    }

    #[test]
    fn waits_for_ready_then_returns_fix() {
        let service = ReplayLocationService::new(vec![
            ServiceSnapshot::not_ready(),
            ServiceSnapshot::not_ready(),
            ServiceSnapshot::ready(19.0760, 72.8777, 2.0),
        ]);
        let mut provider = PolledDeviceLocationProvider::new(service, fast_settings());
        let fix = provider.resolve();
        assert_eq!(fix.coordinates(), Some((19.0760, 72.8777)));
        assert_eq!(fix.source, ProviderKind::Device);
        assert_eq!(provider.service().polls, 3);
        assert_eq!(provider.service().stops, 1);
    }

    #[test]
    fn constant_poor_accuracy_terminates_in_bounded_polls() {
        // 3 -> 4 -> 6 -> 9 -> 14 -> 21 -> 32 -> 48 -> 72 -> 108 -> 162 -> 243 -> 364 -> 546
        let service = ReplayLocationService::new(vec![ServiceSnapshot::ready(1.0, 2.0, 500.0)]);
        let mut provider = PolledDeviceLocationProvider::new(service, fast_settings());
        let fix = provider.resolve();
        assert!(fix.is_present());
        assert_eq!(provider.service().polls, 14);
    }

    #[test]
    fn non_decreasing_accuracy_still_terminates() {
        let script = (0..30).map(|i| ServiceSnapshot::ready(1.0, 2.0, 10.0 + i as f64));
        let service = ReplayLocationService::new(script);
        let mut provider = PolledDeviceLocationProvider::new(service, fast_settings());
        assert!(provider.resolve().is_present());
        assert!(provider.service().polls < 30);
    }

    #[test]
    fn denial_yields_absent_fix_immediately() {
        let service = ReplayLocationService::new(vec![ServiceSnapshot::denied()]);
        let mut provider = PolledDeviceLocationProvider::new(service, fast_settings());
        let fix = provider.resolve();
        assert!(!fix.is_present());
        assert_eq!(provider.service().polls, 1);
        assert_eq!(provider.service().stops, 1);
    }

    #[test]
    fn never_ready_times_out() {
        let service = ReplayLocationService::new(vec![ServiceSnapshot::not_ready()]);
        let settings = DeviceSettings {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(40),
            ..DeviceSettings::default()
        };
        let mut provider = PolledDeviceLocationProvider::new(service, settings);
        let started = Instant::now();
        assert!(!provider.resolve().is_present());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn service_errors_degrade_to_absent() {
        let service = ReplayLocationService::new(Vec::new());
        let mut provider = PolledDeviceLocationProvider::new(service, fast_settings());
        assert!(!provider.resolve().is_present());
        assert_eq!(provider.service().stops, 1);
    }

    #[cfg(unix)]
    #[test]
    fn hung_helper_is_cut_off_at_the_timeout() {
        let service = CommandLocationService::new("sleep", &["3".to_string()]);
        let settings = DeviceSettings {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
            ..DeviceSettings::default()
        };
        let mut provider = PolledDeviceLocationProvider::new(service, settings);
        let started = Instant::now();
        assert!(!provider.resolve().is_present());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[cfg(unix)]
    #[test]
    fn helper_output_is_parsed_into_a_fix() {
        let script = "echo status=ready permission=granted accuracy=1 lat=19.5 lon=72.25";
        let service =
            CommandLocationService::new("sh", &["-c".to_string(), script.to_string()]);
        let mut provider = PolledDeviceLocationProvider::new(service, fast_settings());
        assert_eq!(provider.resolve().coordinates(), Some((19.5, 72.25)));
    }

    #[test]
    fn parses_helper_output() {
        let snap =
            parse_snapshot_line("status=Ready permission=granted accuracy=12 lat=19.5 lon=72.25")
                .unwrap();
        assert_eq!(snap, ServiceSnapshot::ready(19.5, 72.25, 12.0));

        let snap = parse_snapshot_line("status=initializing permission=denied").unwrap();
        assert_eq!(snap.permission, Permission::Denied);
        assert_eq!(snap.status, ServiceStatus::NotReady);

        assert!(parse_snapshot_line("status").is_err());
        assert!(parse_snapshot_line("lat=north").is_err());
    }
}
