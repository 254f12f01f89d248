//! Market tick and TWAP value types.

use chrono::NaiveDateTime;

use super::error::TraderError;
use super::ids::stable_id;

/// Timestamp format used on the wire and in persisted rows.
pub const WIRE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Format a timestamp in the wire format (second resolution).
pub fn format_wire(ts: NaiveDateTime) -> String {
    ts.format(WIRE_FORMAT).to_string()
}

/// Parse a wire-format timestamp.
pub fn parse_wire(s: &str) -> Result<NaiveDateTime, TraderError> {
    NaiveDateTime::parse_from_str(s, WIRE_FORMAT).map_err(|e| TraderError::Store {
        reason: format!("invalid timestamp {s}: {e}"),
    })
}

/// One observed (timestamp, price, volume) for a symbol.
///
/// Ticks are append-only and unique by (symbol, timestamp) at second
/// resolution; the row id is derived from that pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub date_time: NaiveDateTime,
    pub symbol: String,
    pub value: f64,
    pub volume: i64,
}

impl Tick {
    pub fn id(&self) -> String {
        stable_id(&[&self.symbol, &format_wire(self.date_time)])
    }
}

/// An averaged price over a window. value = arithmetic mean of the tick
/// prices inside [start_time, end_time]; zero ticks yield 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Twap {
    pub symbol: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub value: f64,
}

impl Twap {
    pub fn id(&self) -> String {
        stable_id(&[
            &self.symbol,
            &format_wire(self.start_time),
            &format_wire(self.end_time),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn wire_round_trip() {
        let t = ts(9, 30, 15);
        assert_eq!(format_wire(t), "20240304093015");
        assert_eq!(parse_wire("20240304093015").unwrap(), t);
    }

    #[test]
    fn parse_wire_rejects_garbage() {
        assert!(parse_wire("2024-03-04 09:30").is_err());
        assert!(parse_wire("-").is_err());
    }

    #[test]
    fn tick_id_unique_by_symbol_and_timestamp() {
        let a = Tick {
            date_time: ts(9, 0, 0),
            symbol: "AAPL".into(),
            value: 100.0,
            volume: 10,
        };
        let mut b = a.clone();
        assert_eq!(a.id(), b.id());
        b.date_time = ts(9, 0, 1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn twap_id_covers_window_bounds() {
        let w = Twap {
            symbol: "AAPL".into(),
            start_time: ts(9, 0, 0),
            end_time: ts(10, 0, 0),
            value: 101.5,
        };
        let mut other = w.clone();
        other.end_time = ts(11, 0, 0);
        assert_ne!(w.id(), other.id());
    }
}
