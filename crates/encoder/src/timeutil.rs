//! Time formatting utilities for transcoder command arguments.

/// Converts fractional seconds to `HH:MM:SS.ss` for seek arguments.
///
/// Seconds are rounded half-up to two decimals before decomposition, so a
/// value like 59.999 rolls over cleanly to `00:01:00.00`. Hours are not
/// wrapped and may exceed 24.
///
/// ```
/// use parenc::timeutil::format_seconds;
///
/// assert_eq!(format_seconds(0.0), "00:00:00.00");
/// assert_eq!(format_seconds(90.0), "00:01:30.00");
/// assert_eq!(format_seconds(3661.0), "01:01:01.00");
/// assert_eq!(format_seconds(30.53), "00:00:30.53");
/// ```
pub fn format_seconds(seconds: f64) -> String {
    let centis = (seconds * 100.0 + 0.5).floor() as u64;
    let hours = centis / 360_000;
    let minutes = (centis % 360_000) / 6_000;
    let secs = (centis % 6_000) / 100;
    let frac = centis % 100;
    format!("{:02}:{:02}:{:02}.{:02}", hours, minutes, secs, frac)
}

/// Parses a transcoder timestamp (`HH:MM:SS` with optional fraction)
/// back to seconds. Returns 0.0 for anything unparsable, matching how
/// progress lines with malformed timestamps are ignored.
pub fn parse_timestamp(time_str: &str) -> f64 {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }

    let (Ok(hours), Ok(minutes), Ok(seconds)) = (
        parts[0].parse::<f64>(),
        parts[1].parse::<f64>(),
        parts[2].parse::<f64>(),
    ) else {
        return 0.0;
    };

    hours * 3600.0 + minutes * 60.0 + seconds
}
