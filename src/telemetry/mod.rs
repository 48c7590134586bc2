//! Miner output parsing.
//!
//! Each supported backend prints its statistics differently. A
//! [`LineParser`] turns one cleaned output line into a [`ParseUpdate`],
//! which the stats store then applies. Parsers are chosen per backend via
//! [`ParserKind`].

mod ansi;
mod key_value;
mod pipe_table;
mod table;

pub use ansi::strip_ansi;
pub use key_value::KeyValueParser;
pub use pipe_table::{normalize_hashrate, PipeTableParser};
pub use table::TableParser;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// `Total: 51.31 MH/s` style hashrate, shared by the table and key-value formats.
static TOTAL_RATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bTotal:?\s*(\d+(?:\.\d+)?)\s*([kmgtp]?h/s)").expect("valid regex")
});

/// Magnitude of a hashrate, always displayed with a `/s` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashUnit {
    H,
    KH,
    MH,
    GH,
    TH,
    PH,
}

impl HashUnit {
    /// Matches an abbreviated unit token (`m`, `Mh`, `GH`, ...) exactly,
    /// ignoring case. A trailing `/s` must be removed beforehand.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "h" => Some(Self::H),
            "k" | "kh" => Some(Self::KH),
            "m" | "mh" => Some(Self::MH),
            "g" | "gh" => Some(Self::GH),
            "t" | "th" => Some(Self::TH),
            "p" | "ph" => Some(Self::PH),
            _ => None,
        }
    }

    /// Matches a rate token such as `Mh/s` or `gh`.
    pub fn from_rate(rate: &str) -> Option<Self> {
        let token = match rate.len().checked_sub(2) {
            Some(cut) if rate.is_char_boundary(cut) && rate[cut..].eq_ignore_ascii_case("/s") => {
                &rate[..cut]
            }
            _ => rate,
        };
        Self::from_token(token)
    }

    fn label(self) -> &'static str {
        match self {
            Self::H => "H",
            Self::KH => "KH",
            Self::MH => "MH",
            Self::GH => "GH",
            Self::TH => "TH",
            Self::PH => "PH",
        }
    }
}

/// A hashrate reading. Displays as `"<value> <UNIT>/s"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hashrate {
    pub value: f64,
    pub unit: HashUnit,
}

impl Hashrate {
    pub fn new(value: f64, unit: HashUnit) -> Self {
        Self { value, unit }
    }

    fn from_captures(value: &str, rate: &str) -> Option<Self> {
        Some(Self::new(value.parse().ok()?, HashUnit::from_rate(rate)?))
    }
}

impl Default for Hashrate {
    fn default() -> Self {
        Self::new(0.0, HashUnit::MH)
    }
}

impl fmt::Display for Hashrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/s", self.value, self.unit.label())
    }
}

/// How a parsed share count is folded into the running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Absolute value reported by the miner; the last one seen wins.
    Set(u64),
    /// Discrete events to add to the current value.
    Add(u64),
}

impl Counter {
    pub fn apply(self, current: u64) -> u64 {
        match self {
            Self::Set(value) => value,
            Self::Add(events) => current.saturating_add(events),
        }
    }
}

/// Fields extracted from a single output line. Empty when nothing matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseUpdate {
    pub hashrate: Option<Hashrate>,
    pub accepted: Option<Counter>,
    pub rejected: Option<Counter>,
    pub algo: Option<String>,
}

impl ParseUpdate {
    pub fn is_empty(&self) -> bool {
        self.hashrate.is_none()
            && self.accepted.is_none()
            && self.rejected.is_none()
            && self.algo.is_none()
    }
}

/// Converts raw miner output into stat updates, one line at a time.
pub trait LineParser: Send {
    fn parse(&mut self, line: &str) -> ParseUpdate;
}

/// Output format family of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// lolMiner-style summary tables and `Average speed` lines.
    Table,
    /// T-Rex-style `A:<n> R:<n>` counters.
    KeyValue,
    /// BzMiner-style pipe-delimited rows.
    PipeTable,
}

impl ParserKind {
    pub fn build(self) -> Box<dyn LineParser> {
        match self {
            Self::Table => Box::new(TableParser),
            Self::KeyValue => Box::new(KeyValueParser),
            Self::PipeTable => Box::new(PipeTableParser),
        }
    }
}

fn total_rate(line: &str) -> Option<Hashrate> {
    let caps = TOTAL_RATE.captures(line)?;
    Hashrate::from_captures(&caps[1], &caps[2])
}
