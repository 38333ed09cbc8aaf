use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Close boundary for a candle of the given interval.
    pub fn close_time(&self, interval: Interval) -> DateTime<Utc> {
        self.open_time + chrono::Duration::milliseconds(interval.as_millis())
    }

    /// True when the candle trades through `price` (low..=high contains it).
    pub fn touches(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Volume-weighted average price over a candle window.
///
/// Uses the typical price `(high + low + close) / 3` weighted by volume;
/// falls back to the simple mean of closes when total volume is zero.
pub fn vwap(candles: &[Candle]) -> Option<Decimal> {
    if candles.is_empty() {
        return None;
    }

    let total_volume: Decimal = candles.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        let sum: Decimal = candles.iter().map(|c| c.close).sum();
        return Some(sum / Decimal::from(candles.len() as u64));
    }

    let weighted: Decimal = candles.iter().map(|c| c.typical_price() * c.volume).sum();
    Some(weighted / total_volume)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M3 => 3,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.minutes() * 60 * 1000
    }

    pub fn as_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.as_millis())
    }

    /// Floors a timestamp to the interval boundary.
    pub fn align(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let millis = ts.timestamp_millis();
        let step = self.as_millis();
        let floored = millis - millis.rem_euclid(step);
        Utc.timestamp_millis_opt(floored).unwrap()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::M1),
            "3m" => Ok(Interval::M3),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            other => Err(format!("unknown interval '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(close: Decimal, volume: Decimal) -> Candle {
        Candle {
            open_time: Utc.timestamp_millis_opt(0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        let candles = vec![candle(dec!(100), dec!(1)), candle(dec!(200), dec!(3))];
        // typical price equals close for flat candles
        let avg = vwap(&candles).unwrap();
        assert_eq!(avg, dec!(175));
    }

    #[test]
    fn test_vwap_zero_volume_falls_back_to_mean() {
        let candles = vec![candle(dec!(100), dec!(0)), candle(dec!(300), dec!(0))];
        assert_eq!(vwap(&candles).unwrap(), dec!(200));
    }

    #[test]
    fn test_vwap_empty() {
        assert!(vwap(&[]).is_none());
    }

    #[test]
    fn test_interval_align_floors() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56).unwrap();
        let aligned = Interval::M5.align(ts);
        assert_eq!(aligned, Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap());
        // Already aligned timestamps are unchanged
        assert_eq!(Interval::M5.align(aligned), aligned);
    }

    #[test]
    fn test_interval_parse_roundtrip() {
        for s in ["1m", "3m", "5m", "15m", "30m", "1h"] {
            let parsed: Interval = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("2h".parse::<Interval>().is_err());
    }
}
