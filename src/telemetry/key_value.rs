use super::{strip_ansi, total_rate, Counter, LineParser, ParseUpdate};
use regex::Regex;
use std::sync::LazyLock;

static SHARE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bA:(\d+)\b.*?\bR:(\d+)\b").expect("valid regex"));

/// Parser for T-Rex-style output with `A:<n> R:<n>` counters.
#[derive(Debug, Default)]
pub struct KeyValueParser;

impl LineParser for KeyValueParser {
    fn parse(&mut self, line: &str) -> ParseUpdate {
        let line = strip_ansi(line);
        let mut update = ParseUpdate::default();

        match share_pair(&line) {
            Some((accepted, rejected)) => {
                update.accepted = Some(Counter::Set(accepted));
                update.rejected = Some(Counter::Set(rejected));
            }
            None if line.contains("Accepted share") => {
                update.accepted = Some(Counter::Add(1));
            }
            None => {}
        }

        update.hashrate = total_rate(&line);
        update
    }
}

fn share_pair(line: &str) -> Option<(u64, u64)> {
    let caps = SHARE_PAIR.captures(line)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}
