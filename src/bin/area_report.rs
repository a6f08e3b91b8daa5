//! area_report - summarize recorded defects around a point or a city

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use pothole_tagger::{
    report::{analyze_area, find_city, load_cities, markers_geojson, AreaQuery, DEFAULT_CITY_RADIUS_KM},
    store::read_log,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
    Geojson,
}

#[derive(Parser, Debug)]
#[command(name = "area_report", about = "Report recorded defects within a radius")]
struct Args {
    /// Event log written by tagger
    #[arg(long, default_value = "pothole_data.json")]
    log: PathBuf,

    /// Center latitude
    #[arg(long, allow_hyphen_values = true, requires = "lon", conflicts_with = "city")]
    lat: Option<f64>,

    /// Center longitude
    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,

    /// City name looked up in --cities
    #[arg(long)]
    city: Option<String>,

    /// City list: {"cities": [{"name", "latitude", "longitude"}]}
    #[arg(long, default_value = "cities.json")]
    cities: PathBuf,

    /// Radius in km (default 100 for --city)
    #[arg(long)]
    radius_km: Option<f64>,

    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let records = {
        let _stage = ui.stage("Read event log");
        read_log(&args.log)?
    };

    if let Format::Geojson = args.format {
        println!("{}", serde_json::to_string_pretty(&markers_geojson(&records))?);
        return Ok(());
    }

    let query = match (&args.city, args.lat, args.lon) {
        (Some(name), _, _) => {
            let cities = load_cities(&args.cities)?;
            let city = find_city(&cities, name).ok_or_else(|| anyhow!("city '{}' not found", name))?;
            AreaQuery::new(
                city.latitude,
                city.longitude,
                args.radius_km.unwrap_or(DEFAULT_CITY_RADIUS_KM),
            )?
        }
        (None, Some(lat), Some(lon)) => {
            let radius = args
                .radius_km
                .ok_or_else(|| anyhow!("--radius-km is required with --lat/--lon"))?;
            AreaQuery::new(lat, lon, radius)?
        }
        _ => return Err(anyhow!("pass --city or --lat/--lon (or --format geojson)")),
    };

    let report = {
        let _stage = ui.stage("Analyze area");
        analyze_area(&records, query)
    };
    match args.format {
        Format::Text => print!("{}", report.render_text()),
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Geojson => {}
    }
    Ok(())
}
