use serde::{Deserialize, Serialize};

/// Directional bias of a signal or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Buy / bullish
    Long,
    /// Sell / bearish
    Short,
    /// No directional bias
    Neutral,
}

impl Direction {
    /// Returns the opposite direction (neutral stays neutral)
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }

    /// +1 for long, -1 for short, 0 for neutral
    pub fn sign(&self) -> i32 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Neutral => 0,
        }
    }

    /// True when both directions are non-neutral and point opposite ways
    pub fn contradicts(&self, other: Direction) -> bool {
        self.sign() * other.sign() < 0
    }
}
