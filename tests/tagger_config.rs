use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use pothole_tagger::config::{ProviderChoice, TaggerConfig};
use pothole_tagger::LogMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "POTHOLE_CONFIG",
        "POTHOLE_SOURCE",
        "POTHOLE_OUTPUT_DIR",
        "POTHOLE_LOG_PATH",
        "POTHOLE_GEO_PROVIDER",
        "POTHOLE_SERIAL_PORT",
        "POTHOLE_GEO_URL",
        "POTHOLE_MIN_CONFIDENCE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".json").tempfile().expect("temp config");
    let json = r#"{
        "source": { "uri": "/data/frames", "width": 1280, "height": 720 },
        "detector": { "replay_path": "/data/detections.json" },
        "output": { "image_dir": "/data/out", "log_mode": "append_in_place" },
        "filter": { "min_confidence": 0.6, "exclusion_band_y": 650 },
        "geo": {
            "provider": "device",
            "device": { "command": ["/usr/bin/where-am-i", "--json"], "timeout_ms": 2500 },
            "http": { "timeout_ms": 1500 }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("POTHOLE_CONFIG", file.path());
    std::env::set_var("POTHOLE_LOG_PATH", "/data/events.json");
    std::env::set_var("POTHOLE_MIN_CONFIDENCE", "0.8");

    let cfg = TaggerConfig::load().expect("load config");

    assert_eq!(cfg.source.uri, "/data/frames");
    assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    assert_eq!(cfg.detector.replay_path, Some(PathBuf::from("/data/detections.json")));
    assert_eq!(cfg.output.image_dir, PathBuf::from("/data/out"));
    assert_eq!(cfg.output.log_path, PathBuf::from("/data/events.json"));
    assert_eq!(cfg.output.log_mode, LogMode::AppendInPlace);
    assert_eq!(cfg.filter.min_confidence, 0.8);
    assert_eq!(cfg.filter.exclusion_band_y, 650.0);
    assert_eq!(cfg.filter.max_area_ratio, 0.10);
    assert_eq!(cfg.geo.provider, ProviderChoice::Device);
    assert_eq!(cfg.geo.device.command, vec!["/usr/bin/where-am-i", "--json"]);
    assert_eq!(cfg.geo.device.timeout, Duration::from_millis(2500));
    assert_eq!(cfg.geo.http.timeout, Duration::from_millis(1500));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [geo]
        provider = "static"

        [geo.static]
        latitude = 18.5204
        longitude = 73.8567
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = TaggerConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.geo.provider, ProviderChoice::Static);
    assert_eq!(cfg.geo.fixed.latitude, 18.5204);
    assert_eq!(cfg.geo.fixed.longitude, 73.8567);
    assert_eq!(cfg.output.log_mode, LogMode::FullRewrite);

    clear_env();
}

#[test]
fn env_provider_override_is_validated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("POTHOLE_GEO_PROVIDER", "serial");
    std::env::set_var("POTHOLE_SERIAL_PORT", "/dev/ttyUSB1");
    let cfg = TaggerConfig::load().expect("load config");
    assert_eq!(cfg.geo.provider, ProviderChoice::Serial);
    assert_eq!(cfg.geo.serial.port, "/dev/ttyUSB1");

    std::env::set_var("POTHOLE_GEO_PROVIDER", "satellite");
    assert!(TaggerConfig::load().is_err());

    clear_env();
    std::env::set_var("POTHOLE_MIN_CONFIDENCE", "1.2");
    assert!(TaggerConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("POTHOLE_CONFIG", "/nonexistent/pothole.toml");
    let err = TaggerConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
