use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeFrameError {
    #[error("Invalid amount for {:?}: {}", unit, message)]
    InvalidAmount {
        unit: TimeFrameUnit,
        message: String,
    },

    #[error("Invalid input: {}", message)]
    InvalidInput { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFrameUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

/// A bar interval, e.g. 1 day or 5 minutes.
///
/// The short label (`1d`, `5m`, ...) doubles as the `timeframe` column value
/// in storage, so it is part of the natural key of every persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFrame {
    pub amount: u32,
    pub unit: TimeFrameUnit,
}

impl TimeFrame {
    pub fn new(amount: u32, unit: TimeFrameUnit) -> Result<Self, TimeFrameError> {
        Self::validate(amount, unit)?;
        Ok(Self { amount, unit })
    }

    /// The canonical daily timeframe.
    pub fn day() -> Self {
        Self {
            amount: 1,
            unit: TimeFrameUnit::Day,
        }
    }

    /// The canonical one-minute timeframe.
    pub fn minute() -> Self {
        Self {
            amount: 1,
            unit: TimeFrameUnit::Minute,
        }
    }

    fn validate(amount: u32, unit: TimeFrameUnit) -> Result<(), TimeFrameError> {
        match unit {
            TimeFrameUnit::Minute if !(1..=59).contains(&amount) => {
                Err(TimeFrameError::InvalidAmount {
                    unit,
                    message: "Minute units can only be used with amounts between 1-59.".into(),
                })
            }
            TimeFrameUnit::Hour if !(1..=23).contains(&amount) => {
                Err(TimeFrameError::InvalidAmount {
                    unit,
                    message: "Hour units can only be used with amounts 1-23".into(),
                })
            }
            TimeFrameUnit::Day | TimeFrameUnit::Week if amount != 1 => {
                Err(TimeFrameError::InvalidAmount {
                    unit,
                    message: "Day and Week units can only be used with amount 1".into(),
                })
            }
            TimeFrameUnit::Month if ![1, 2, 3, 6, 12].contains(&amount) => {
                Err(TimeFrameError::InvalidAmount {
                    unit,
                    message: "Month units can only be used with amount 1, 2, 3, 6 and 12".into(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self.unit {
            TimeFrameUnit::Minute => "m",
            TimeFrameUnit::Hour => "h",
            TimeFrameUnit::Day => "d",
            TimeFrameUnit::Week => "w",
            TimeFrameUnit::Month => "mo",
        };
        write!(f, "{}{}", self.amount, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_minute_timeframe() {
        let tf = TimeFrame::new(5, TimeFrameUnit::Minute);
        assert!(tf.is_ok());
        let tf = tf.unwrap();
        assert_eq!(tf.amount, 5);
        assert!(matches!(tf.unit, TimeFrameUnit::Minute));
    }

    #[test]
    fn test_valid_hour_timeframe() {
        let tf = TimeFrame::new(6, TimeFrameUnit::Hour);
        assert!(tf.is_ok());
    }

    #[test]
    fn test_valid_month_timeframes() {
        for amount in [1, 2, 3, 6, 12] {
            let tf = TimeFrame::new(amount, TimeFrameUnit::Month);
            assert!(tf.is_ok(), "Month with amount {} should be valid", amount);
        }
    }

    #[test]
    fn test_invalid_minute_timeframe() {
        assert!(TimeFrame::new(0, TimeFrameUnit::Minute).is_err());
        assert!(TimeFrame::new(60, TimeFrameUnit::Minute).is_err());
    }

    #[test]
    fn test_invalid_hour_timeframe() {
        assert!(TimeFrame::new(0, TimeFrameUnit::Hour).is_err());
        assert!(TimeFrame::new(24, TimeFrameUnit::Hour).is_err());
    }

    #[test]
    fn test_invalid_day_and_week_timeframes() {
        assert!(TimeFrame::new(2, TimeFrameUnit::Day).is_err());
        assert!(TimeFrame::new(2, TimeFrameUnit::Week).is_err());
    }

    #[test]
    fn test_invalid_month_timeframe() {
        for amount in [0, 4, 5, 7, 8, 9, 10, 11, 13] {
            assert!(
                TimeFrame::new(amount, TimeFrameUnit::Month).is_err(),
                "Month with amount {} should be invalid",
                amount
            );
        }
    }

    #[test]
    fn test_error_messages() {
        match TimeFrame::new(60, TimeFrameUnit::Minute) {
            Err(TimeFrameError::InvalidAmount { unit, message }) => {
                assert!(matches!(unit, TimeFrameUnit::Minute));
                assert!(message.contains("Minute"));
            }
            _ => panic!("Expected InvalidAmount error"),
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(TimeFrame::day().to_string(), "1d");
        assert_eq!(TimeFrame::minute().to_string(), "1m");
        assert_eq!(
            TimeFrame::new(4, TimeFrameUnit::Hour).unwrap().to_string(),
            "4h"
        );
        assert_eq!(
            TimeFrame::new(3, TimeFrameUnit::Month).unwrap().to_string(),
            "3mo"
        );
    }
}
