//! Red/amber/green banding of utilization.
//!
//! Bands are closed on their lower bound: exactly 0.85 is RED and exactly
//! 0.75 is AMBER.
use std::fmt;
use std::str::FromStr;

pub const RED_THRESHOLD: f64 = 0.85;
pub const AMBER_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rag {
    Red,
    Amber,
    Green,
    /// Utilization is undefined (zero capacity).
    Unclassified,
}

impl Rag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rag::Red => "RED",
            Rag::Amber => "AMBER",
            Rag::Green => "GREEN",
            Rag::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl fmt::Display for Rag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RED" => Ok(Rag::Red),
            "AMBER" => Ok(Rag::Amber),
            "GREEN" => Ok(Rag::Green),
            "UNCLASSIFIED" | "" => Ok(Rag::Unclassified),
            other => Err(format!("unknown RAG value {:?}", other)),
        }
    }
}

pub fn classify(utilization: Option<f64>) -> Rag {
    match utilization {
        Some(u) if u.is_nan() => Rag::Unclassified,
        Some(u) if u >= RED_THRESHOLD => Rag::Red,
        Some(u) if u >= AMBER_THRESHOLD => Rag::Amber,
        Some(_) => Rag::Green,
        None => Rag::Unclassified,
    }
}
