//! Sunrise/sunset minutes from geolocation, recomputed once per day by the
//! daemon loop. Uses the classic almanac approximation with the standard
//! refraction zenith; accurate to a couple of minutes, which is plenty for
//! minute-resolution start times.

use chrono::{Datelike, NaiveDate};

pub const DEFAULT_SUNRISE_MIN: u16 = 360;
pub const DEFAULT_SUNSET_MIN: u16 = 1080;

/// Official sunrise/sunset zenith including refraction.
const ZENITH: f64 = 90.833;

fn sin_d(d: f64) -> f64 {
    d.to_radians().sin()
}

fn cos_d(d: f64) -> f64 {
    d.to_radians().cos()
}

fn tan_d(d: f64) -> f64 {
    d.to_radians().tan()
}

/// Parse an options `loc` string of the form `"lat,lon"`.
pub fn parse_location(loc: &str) -> Option<(f64, f64)> {
    let mut parts = loc.split(',');
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() || !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon)
    {
        return None;
    }
    Some((lat, lon))
}

/// Local sunrise and sunset as minutes from midnight for the given date and
/// UTC offset. `None` during polar day/night.
pub fn sun_times(
    lat: f64,
    lon: f64,
    date: NaiveDate,
    tz_offset_min: i32,
) -> Option<(u16, u16)> {
    let rise = event_utc_minutes(lat, lon, date, true)?;
    let set = event_utc_minutes(lat, lon, date, false)?;
    let local = |utc_min: f64| ((utc_min as i32 + tz_offset_min).rem_euclid(1440)) as u16;
    Some((local(rise), local(set)))
}

fn event_utc_minutes(lat: f64, lon: f64, date: NaiveDate, rising: bool) -> Option<f64> {
    let n = date.ordinal() as f64;
    let lng_hour = lon / 15.0;
    let t = if rising {
        n + (6.0 - lng_hour) / 24.0
    } else {
        n + (18.0 - lng_hour) / 24.0
    };

    // Mean anomaly → true longitude.
    let m = 0.9856 * t - 3.289;
    let l = (m + 1.916 * sin_d(m) + 0.020 * sin_d(2.0 * m) + 282.634).rem_euclid(360.0);

    // Right ascension, pushed into the same quadrant as L.
    let mut ra = (0.91764 * tan_d(l)).atan().to_degrees().rem_euclid(360.0);
    ra += (l / 90.0).floor() * 90.0 - (ra / 90.0).floor() * 90.0;
    ra /= 15.0;

    let sin_dec = 0.39782 * sin_d(l);
    let cos_dec = sin_dec.asin().cos();

    let cos_h = (cos_d(ZENITH) - sin_dec * sin_d(lat)) / (cos_dec * cos_d(lat));
    if !(-1.0..=1.0).contains(&cos_h) {
        return None; // sun never rises or never sets today
    }

    let h = if rising {
        360.0 - cos_h.acos().to_degrees()
    } else {
        cos_h.acos().to_degrees()
    } / 15.0;

    let mean_t = h + ra - 0.06571 * t - 6.622;
    Some((mean_t - lng_hour).rem_euclid(24.0) * 60.0)
}

// ===========================================================================
// Tests
// ===========================================================================
