//! Calendar conversion for archive timestamps.

const MS_PER_DAY: i64 = 86_400_000;

/// Days between 1970-01-01 and the given proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Milliseconds since the Unix epoch for a UTC wall-clock time.
///
/// Out-of-range months and days are clamped so that malformed archive
/// fields still decode to a nearby instant.
pub(crate) fn utc_ms(year: i64, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> f64 {
    let month = month.clamp(1, 12);
    let day = day.clamp(1, 31);
    let days = days_from_civil(year, month, day);
    let secs = i64::from(hour) * 3600 + i64::from(min) * 60 + i64::from(sec);
    (days * MS_PER_DAY + secs * 1000) as f64
}
