//! NMEA-0183 GGA sentence parsing.
//!
//! `$GPGGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,nn,h.h,a.a,M,g.g,M,,*cs`
//!
//! Latitude is `ddmm.mmmm`, longitude `dddmm.mmmm`; hemisphere letters
//! `S` and `W` negate. A checksum, when present, is the XOR of every byte
//! between `$` and `*`.

use anyhow::{anyhow, bail, Result};

pub const GGA_TALKER_ID: &str = "GPGGA";

#[derive(Clone, Debug, PartialEq)]
pub struct GgaFix {
    pub latitude: f64,
    pub longitude: f64,
    /// 0 = invalid, 1 = GPS, 2 = DGPS, ...
    pub quality: u8,
    pub satellites: Option<u8>,
    pub hdop: Option<f64>,
    pub altitude_m: Option<f64>,
}

/// True when the line carries a GGA sentence from a GPS talker.
pub fn is_gga(line: &str) -> bool {
    let line = line.trim_start();
    line.strip_prefix('$')
        .unwrap_or(line)
        .starts_with(GGA_TALKER_ID)
}

pub fn parse_gga(line: &str) -> Result<GgaFix> {
    let line = line.trim();
    let body = line.strip_prefix('$').unwrap_or(line);
    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            verify_checksum(body, checksum)?;
            body
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 10 {
        bail!("GGA sentence has {} fields, expected at least 10", fields.len());
    }
    if fields[0] != GGA_TALKER_ID {
        bail!("not a GGA sentence: {}", fields[0]);
    }

    let quality: u8 = fields[6]
        .parse()
        .map_err(|_| anyhow!("invalid GGA fix quality '{}'", fields[6]))?;
    if quality == 0 {
        bail!("GGA sentence reports no fix");
    }

    let latitude = parse_coordinate(fields[2], fields[3], 2, 'N', 'S')?;
    let longitude = parse_coordinate(fields[4], fields[5], 3, 'E', 'W')?;

    Ok(GgaFix {
        latitude,
        longitude,
        quality,
        satellites: fields[7].parse().ok(),
        hdop: fields[8].parse().ok(),
        altitude_m: fields[9].parse().ok(),
    })
}

fn verify_checksum(body: &str, checksum: &str) -> Result<()> {
    let expected = u8::from_str_radix(checksum.trim(), 16)
        .map_err(|_| anyhow!("invalid NMEA checksum '{}'", checksum))?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual != expected {
        bail!(
            "NMEA checksum mismatch (expected {:02X}, computed {:02X})",
            expected,
            actual
        );
    }
    Ok(())
}

fn parse_coordinate(
    value: &str,
    hemisphere: &str,
    degree_digits: usize,
    positive: char,
    negative: char,
) -> Result<f64> {
    if value.is_empty() {
        bail!("GGA coordinate field is empty");
    }
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 2 || dot - 2 > degree_digits {
        bail!("malformed GGA coordinate '{}'", value);
    }
    let (deg, min) = value.split_at(dot - 2);
    let degrees: f64 = if deg.is_empty() {
        0.0
    } else {
        deg.parse()
            .map_err(|_| anyhow!("malformed GGA degrees '{}'", value))?
    };
    let minutes: f64 = min
        .parse()
        .map_err(|_| anyhow!("malformed GGA minutes '{}'", value))?;
    if !(0.0..60.0).contains(&minutes) {
        bail!("GGA minutes out of range in '{}'", value);
    }
    let magnitude = degrees + minutes / 60.0;
    match hemisphere.chars().next() {
        Some(h) if h == positive => Ok(magnitude),
        Some(h) if h == negative => Ok(-magnitude),
        _ => bail!("invalid GGA hemisphere '{}'", hemisphere),
    }
}
