use super::{strip_ansi, total_rate, Counter, HashUnit, Hashrate, LineParser, ParseUpdate};
use regex::Regex;
use std::sync::LazyLock;

/// ` 7/0/0` accepted/rejected/stale triple inside a summary row.
static SHARE_TRIPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s(\d+)/(\d+)/(\d+)(?:\s|$)").expect("valid regex"));

/// `Average speed (15s): 50.94 Mh/s`
static AVERAGE_SPEED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Average speed[^:]*:\s*(\d+(?:\.\d+)?)\s*([kmgtp]?h/s)").expect("valid regex")
});

/// Parser for lolMiner-style output.
///
/// Individual `Share accepted` events increment the accepted counter, while
/// the periodic `Total` summary row carries absolute counts that replace it.
#[derive(Debug, Default)]
pub struct TableParser;

impl LineParser for TableParser {
    fn parse(&mut self, line: &str) -> ParseUpdate {
        let line = strip_ansi(line);
        let mut update = ParseUpdate::default();

        if line.contains("Share accepted") || line.contains("Accepted share") {
            update.accepted = Some(Counter::Add(1));
        }

        // Per-GPU rows also carry triples; only the totals row is authoritative.
        if line.contains("Total") && !line.contains("GPU") {
            if let Some((accepted, rejected)) = share_totals(&line) {
                update.accepted = Some(Counter::Set(accepted));
                update.rejected = Some(Counter::Set(rejected));
            }
        }

        update.hashrate = average_speed(&line)
            .or_else(|| total_rate(&line))
            .or_else(|| totals_row_guess(&line));
        update
    }
}

fn share_totals(line: &str) -> Option<(u64, u64)> {
    let caps = SHARE_TRIPLE.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

fn average_speed(line: &str) -> Option<Hashrate> {
    let caps = AVERAGE_SPEED.captures(line)?;
    Hashrate::from_captures(&caps[1], &caps[2])
}

/// `Total  51.31  ...` rows print the hashrate as the first column without a
/// unit. lolMiner reports MH/s there.
fn totals_row_guess(line: &str) -> Option<Hashrate> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("Total") {
        return None;
    }
    let value: f64 = parts.next()?.parse().ok()?;
    parts.next()?;
    (value > 0.0).then(|| Hashrate::new(value, HashUnit::MH))
}
