use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which flat-file feed of the archive a request targets.
///
/// Only the aggregate feeds are validated and loaded today; trades and
/// quotes resolve to paths so existence checks work, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    DayAggs,
    MinuteAggs,
    Trades,
    Quotes,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::DayAggs => "day_aggs",
            DataType::MinuteAggs => "minute_aggs",
            DataType::Trades => "trades",
            DataType::Quotes => "quotes",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day_aggs" => Ok(DataType::DayAggs),
            "minute_aggs" => Ok(DataType::MinuteAggs),
            "trades" => Ok(DataType::Trades),
            "quotes" => Ok(DataType::Quotes),
            other => Err(format!(
                "unknown data type '{other}', expected one of: day_aggs, minute_aggs, trades, quotes"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for dt in [
            DataType::DayAggs,
            DataType::MinuteAggs,
            DataType::Trades,
            DataType::Quotes,
        ] {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
        assert!("hourly".parse::<DataType>().is_err());
    }
}
