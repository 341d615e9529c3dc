//! Frame index to wall-clock offsets relative to the match start.

use anyhow::{anyhow, Result};

/// Elapsed time since `start_index` as `HH:MM:SS`.
///
/// Seconds are floored. Indices before the start clamp to `00:00:00`; hours
/// grow past two digits for very long recordings.
pub fn normalize(frame_index: u64, start_index: u64, sampling_rate: f64) -> String {
    let frames = frame_index.saturating_sub(start_index);
    let total = if sampling_rate > 0.0 {
        (frames as f64 / sampling_rate).floor() as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Parse `HH:MM:SS` back into seconds.
pub fn parse_timestamp(raw: &str) -> Result<u64> {
    let mut parts = raw.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(anyhow!("timestamp {:?} is not HH:MM:SS", raw));
    };
    let field = |part: &str, max: Option<u64>| -> Result<u64> {
        if part.len() < 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!("timestamp {:?} is not HH:MM:SS", raw));
        }
        let value: u64 = part
            .parse()
            .map_err(|_| anyhow!("timestamp {:?} is out of range", raw))?;
        match max {
            Some(max) if value > max => Err(anyhow!("timestamp {:?} is out of range", raw)),
            _ => Ok(value),
        }
    };
    let (h, m, s) = (field(h, None)?, field(m, Some(59))?, field(s, Some(59))?);
    h.checked_mul(3600)
        .and_then(|secs| secs.checked_add(m * 60 + s))
        .ok_or_else(|| anyhow!("timestamp {:?} is out of range", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_relative_to_start() {
        assert_eq!(normalize(0, 0, 2.0), "00:00:00");
        assert_eq!(normalize(3, 0, 2.0), "00:00:01");
        assert_eq!(normalize(10, 4, 2.0), "00:00:03");
        assert_eq!(normalize(7_322, 0, 2.0), "01:01:01");
        assert_eq!(normalize(90, 0, 0.5), "00:03:00");
    }

    #[test]
    fn frames_before_start_clamp_to_zero() {
        assert_eq!(normalize(2, 10, 2.0), "00:00:00");
    }

    #[test]
    fn parses_back_to_seconds() {
        assert_eq!(parse_timestamp("00:00:00").unwrap(), 0);
        assert_eq!(parse_timestamp("01:02:03").unwrap(), 3723);
        assert_eq!(parse_timestamp(&normalize(7_322, 0, 2.0)).unwrap(), 3661);
    }

    #[test]
    fn rejects_malformed_timestamps() {
        for bad in ["", "1:02:03", "00:60:00", "00:00", "00:00:00:00", "aa:bb:cc", "00:-1:00"] {
            assert!(parse_timestamp(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_hours_that_overflow_seconds() {
        let err = parse_timestamp("9999999999999999:00:00").unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert_eq!(
            parse_timestamp("5124095576030431:00:15").unwrap(),
            u64::MAX
        );
        assert!(parse_timestamp("5124095576030431:00:16").is_err());
    }
}
