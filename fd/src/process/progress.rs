//! Transcoder progress parsing
//!
//! FFmpeg-style tools rewrite a status line on stderr:
//!
//! ```text
//! frame=  123 fps= 30 q=28.0 size=    1234kB time=00:00:05.00 bitrate= 123.4kbits/s speed=1.5x
//! ```
//!
//! The parser consumes those lines and emits structured updates, converting
//! elapsed time to a percentage when the total duration is known. Updates
//! are throttled so a busy transcode does not flood the telemetry stream.

use std::time::{Duration, Instant};

use regex::Regex;

/// Minimum interval between emitted updates.
pub const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_secs(2);

/// One structured progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub elapsed: Duration,
    /// Percentage of the total duration, when one was supplied. Clamped to 100.
    pub percent: Option<f64>,
    pub size_kb: Option<u64>,
    pub speed: Option<f64>,
    pub bitrate_kbps: Option<f64>,
}

impl ProgressUpdate {
    /// Human-readable one-liner for the progress stream.
    pub fn message(&self) -> String {
        let mut parts = Vec::new();
        if let Some(percent) = self.percent {
            parts.push(format!("{percent:.1}%"));
        }
        let secs = self.elapsed.as_secs();
        parts.push(format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60));
        if let Some(size) = self.size_kb {
            if size >= 1024 {
                parts.push(format!("{:.1}MB", size as f64 / 1024.0));
            } else {
                parts.push(format!("{size}kB"));
            }
        }
        if let Some(bitrate) = self.bitrate_kbps {
            if bitrate >= 1024.0 {
                parts.push(format!("{:.1}Mbps", bitrate / 1024.0));
            } else {
                parts.push(format!("{bitrate:.0}kbps"));
            }
        }
        if let Some(speed) = self.speed {
            parts.push(format!("{speed}x"));
        }
        parts.join(" ")
    }
}

/// Stateful stderr consumer. Feed it every line; it returns an update when
/// the line carries progress tokens and the throttle window has elapsed.
pub struct ProgressParser {
    total: Option<Duration>,
    min_interval: Duration,
    last_emit: Option<Instant>,
    re_time: Regex,
    re_size: Regex,
    re_speed: Regex,
    re_bitrate: Regex,
}

impl ProgressParser {
    pub fn new(total: Option<Duration>) -> Self {
        Self::with_interval(total, PROGRESS_EMIT_INTERVAL)
    }

    pub fn with_interval(total: Option<Duration>, min_interval: Duration) -> Self {
        Self {
            total,
            min_interval,
            last_emit: None,
            re_time: Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("valid regex"),
            re_size: Regex::new(r"size=\s*(\d+)kB").expect("valid regex"),
            re_speed: Regex::new(r"speed=\s*([\d.]+)x").expect("valid regex"),
            re_bitrate: Regex::new(r"bitrate=\s*([\d.]+)kbits/s").expect("valid regex"),
        }
    }

    /// Consume one stderr line. Returns `None` for non-progress lines and
    /// for updates inside the throttle window.
    pub fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let update = self.extract(line)?;
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        Some(update)
    }

    /// Token extraction without throttling (used by tests and final lines).
    pub fn extract(&self, line: &str) -> Option<ProgressUpdate> {
        let caps = self.re_time.captures(line)?;
        let hours: u64 = caps[1].parse().ok()?;
        let minutes: u64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        let elapsed = Duration::from_secs_f64((hours * 3600 + minutes * 60) as f64 + seconds);

        let percent = self.total.map(|total| {
            if total.is_zero() {
                100.0
            } else {
                (elapsed.as_secs_f64() / total.as_secs_f64() * 100.0).min(100.0)
            }
        });

        Some(ProgressUpdate {
            elapsed,
            percent,
            size_kb: self
                .re_size
                .captures(line)
                .and_then(|c| c[1].parse().ok()),
            speed: self
                .re_speed
                .captures(line)
                .and_then(|c| c[1].parse().ok()),
            bitrate_kbps: self
                .re_bitrate
                .captures(line)
                .and_then(|c| c[1].parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "frame=  123 fps= 30 q=28.0 size=    1234kB time=00:00:05.00 bitrate= 123.4kbits/s speed=1.5x";

    #[test]
    fn test_extract_all_tokens() {
        let parser = ProgressParser::new(Some(Duration::from_secs(10)));
        let update = parser.extract(LINE).unwrap();
        assert_eq!(update.elapsed, Duration::from_secs(5));
        assert_eq!(update.percent, Some(50.0));
        assert_eq!(update.size_kb, Some(1234));
        assert_eq!(update.speed, Some(1.5));
        assert_eq!(update.bitrate_kbps, Some(123.4));
    }

    #[test]
    fn test_no_total_no_percent() {
        let parser = ProgressParser::new(None);
        let update = parser.extract(LINE).unwrap();
        assert_eq!(update.percent, None);
    }

    #[test]
    fn test_percent_clamped() {
        let parser = ProgressParser::new(Some(Duration::from_secs(2)));
        let update = parser.extract(LINE).unwrap();
        assert_eq!(update.percent, Some(100.0));
    }

    #[test]
    fn test_non_progress_line_ignored() {
        let mut parser = ProgressParser::new(None);
        assert!(parser.parse_line("Input #0, mp4, from 'in.mp4':").is_none());
    }

    #[test]
    fn test_throttle_suppresses_rapid_updates() {
        let mut parser = ProgressParser::with_interval(None, Duration::from_secs(60));
        assert!(parser.parse_line(LINE).is_some());
        assert!(parser.parse_line(LINE).is_none());
    }

    #[test]
    fn test_throttle_window_elapses() {
        let mut parser = ProgressParser::with_interval(None, Duration::from_millis(0));
        assert!(parser.parse_line(LINE).is_some());
        assert!(parser.parse_line(LINE).is_some());
    }

    #[test]
    fn test_fractional_time() {
        let parser = ProgressParser::new(None);
        let update = parser.extract("time=01:02:03.50 bitrate=N/A").unwrap();
        assert_eq!(update.elapsed, Duration::from_secs_f64(3723.5));
        assert_eq!(update.bitrate_kbps, None);
    }

    #[test]
    fn test_message_formatting() {
        let update = ProgressUpdate {
            elapsed: Duration::from_secs(65),
            percent: Some(42.5),
            size_kb: Some(2048),
            speed: Some(1.5),
            bitrate_kbps: Some(2048.0),
        };
        let msg = update.message();
        assert!(msg.contains("42.5%"));
        assert!(msg.contains("00:01:05"));
        assert!(msg.contains("2.0MB"));
        assert!(msg.contains("2.0Mbps"));
        assert!(msg.contains("1.5x"));
    }
}
