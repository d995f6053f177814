use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-instrument position lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// No position and nothing in flight
    None,
    /// Buy submitted, waiting for the fill
    Opening,
    /// Position held and monitored
    Open,
    /// Sell submitted, waiting for the fill
    Closing,
    /// Fully closed; transient before returning to `None`
    Closed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::None => "NONE",
            Lifecycle::Opening => "OPENING",
            Lifecycle::Open => "OPEN",
            Lifecycle::Closing => "CLOSING",
            Lifecycle::Closed => "CLOSED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: Lifecycle) -> bool {
        use Lifecycle::*;

        match (self, target) {
            // Entry
            (None, Opening) => true,
            (Opening, Open) => true,  // Fill confirmed
            (Opening, None) => true,  // Buy failed or skipped, nothing held

            // Startup adoption of an existing exchange balance
            (None, Open) => true,

            // Exit
            (Open, Closing) => true,
            (Closing, Open) => true,   // Partial sell done, or sell failed
            (Closing, Closed) => true, // Full close filled

            (Closed, None) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<Lifecycle> {
        use Lifecycle::*;

        match self {
            None => vec![Opening, Open],
            Opening => vec![Open, None],
            Open => vec![Closing],
            Closing => vec![Open, Closed],
            Closed => vec![None],
        }
    }

    /// An exchange call is in flight for this instrument.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Lifecycle::Opening | Lifecycle::Closing)
    }

    /// A position exists (or is being closed) for this instrument.
    pub fn holds_position(&self) -> bool {
        matches!(self, Lifecycle::Open | Lifecycle::Closing)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Lifecycle {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "NONE" => Ok(Lifecycle::None),
            "OPENING" => Ok(Lifecycle::Opening),
            "OPEN" => Ok(Lifecycle::Open),
            "CLOSING" => Ok(Lifecycle::Closing),
            "CLOSED" => Ok(Lifecycle::Closed),
            _ => Err(format!("Unknown lifecycle state: {}", s)),
        }
    }
}

/// Urgency attached to an exit evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Normal,
    Elevated,
    Critical,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Normal => write!(f, "NORMAL"),
            Urgency::Elevated => write!(f, "ELEVATED"),
            Urgency::Critical => write!(f, "CRITICAL"),
        }
    }
}
