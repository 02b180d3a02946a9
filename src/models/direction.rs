use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }

    pub fn bias(self) -> Bias {
        match self {
            Direction::Buy => Bias::Bullish,
            Direction::Sell => Bias::Bearish,
        }
    }
}

/// Kind of a directional zone (FVG, order block) or a structure break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bias::Bullish => write!(f, "bullish"),
            Bias::Bearish => write!(f, "bearish"),
        }
    }
}

impl Bias {
    pub fn to_direction(self) -> Direction {
        match self {
            Bias::Bullish => Direction::Buy,
            Bias::Bearish => Direction::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    /// Swings disagree (one side rising, the other falling).
    Range,
    /// Not enough swings, or the timeframe could not be analyzed.
    Neutral,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Range => write!(f, "range"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

impl Trend {
    pub fn bias(self) -> Option<Bias> {
        match self {
            Trend::Bullish => Some(Bias::Bullish),
            Trend::Bearish => Some(Bias::Bearish),
            Trend::Range | Trend::Neutral => None,
        }
    }

    pub fn to_direction(self) -> Option<Direction> {
        self.bias().map(Bias::to_direction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwingKind {
    High,
    Low,
}

impl fmt::Display for SwingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwingKind::High => write!(f, "high"),
            SwingKind::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FibZone {
    Premium,
    Discount,
}

impl fmt::Display for FibZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FibZone::Premium => write!(f, "premium"),
            FibZone::Discount => write!(f, "discount"),
        }
    }
}

impl FibZone {
    pub fn for_bias(bias: Bias) -> Self {
        match bias {
            Bias::Bullish => FibZone::Discount,
            Bias::Bearish => FibZone::Premium,
        }
    }
}
