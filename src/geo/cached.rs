//! Background resolution with a last-known-fix cache.
//!
//! A worker thread resolves the wrapped provider on a fixed cadence and keeps
//! the most recent present fix. `resolve()` never blocks on the provider: it
//! hands out the cached fix when it is younger than `max_age`, otherwise an
//! absent one. Cached fixes were resolved before they are handed out, so an
//! event stamped afterwards never predates its fix.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{GeoFix, GeoLocationProvider, ProviderKind};

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

pub struct CachedLocationProvider {
    kind: ProviderKind,
    latest: Arc<Mutex<Option<GeoFix>>>,
    max_age: Duration,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl CachedLocationProvider {
    pub fn spawn(
        mut inner: Box<dyn GeoLocationProvider>,
        refresh_interval: Duration,
        max_age: Duration,
    ) -> Result<Self> {
        let kind = inner.kind();
        let latest = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_latest = Arc::clone(&latest);
        let worker_shutdown = Arc::clone(&shutdown);
        let join = std::thread::Builder::new()
            .name(format!("geo-{}", kind))
            .spawn(move || {
                while !worker_shutdown.load(Ordering::SeqCst) {
                    let fix = inner.resolve();
                    if fix.is_present() {
                        let mut guard = match worker_latest.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        *guard = Some(fix);
                    }
                    let next = Instant::now() + refresh_interval;
                    while Instant::now() < next && !worker_shutdown.load(Ordering::SeqCst) {
                        std::thread::sleep(SHUTDOWN_POLL.min(refresh_interval));
                    }
                }
            })
            .map_err(|e| anyhow!("spawn geolocation worker: {}", e))?;

        log::info!(
            "geolocation worker started for {} (refresh {:?}, max age {:?})",
            kind,
            refresh_interval,
            max_age
        );
        Ok(Self {
            kind,
            latest,
            max_age,
            shutdown,
            join: Some(join),
        })
    }

    fn cached(&self) -> Option<GeoFix> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl GeoLocationProvider for CachedLocationProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn resolve(&mut self) -> GeoFix {
        let Some(fix) = self.cached() else {
            log::debug!("no cached {} fix yet", self.kind);
            return GeoFix::absent(self.kind);
        };
        let age = Utc::now()
            .signed_duration_since(fix.resolved_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            log::warn!("cached {} fix is stale ({:?} old)", self.kind, age);
            return GeoFix::absent(self.kind);
        }
        fix
    }
}

impl Drop for CachedLocationProvider {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("geolocation worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::StaticLocationProvider;

    struct NeverProvider;

    impl GeoLocationProvider for NeverProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::HttpIp
        }

        fn resolve(&mut self) -> GeoFix {
            GeoFix::absent(ProviderKind::HttpIp)
        }
    }

    #[test]
    fn serves_fix_resolved_in_background() {
        let inner = Box::new(StaticLocationProvider::new(19.0760, 72.8777).unwrap());
        let mut cached = CachedLocationProvider::spawn(
            inner,
            Duration::from_millis(10),
            Duration::from_secs(60),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut fix = cached.resolve();
        while !fix.is_present() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            fix = cached.resolve();
        }
        assert_eq!(fix.coordinates(), Some((19.0760, 72.8777)));
        assert_eq!(fix.source, ProviderKind::Static);
        assert!(fix.resolved_at <= Utc::now());
    }

    #[test]
    fn absent_until_a_fix_exists() {
        let mut cached = CachedLocationProvider::spawn(
            Box::new(NeverProvider),
            Duration::from_millis(10),
            Duration::from_secs(60),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let fix = cached.resolve();
        assert!(!fix.is_present());
        assert_eq!(fix.source, ProviderKind::HttpIp);
    }
}
