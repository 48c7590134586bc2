use super::{strip_ansi, Counter, HashUnit, Hashrate, LineParser, ParseUpdate};

// Column layout of a device row once the outer pipes are dropped:
// | device | algo | hashrate | pool hashrate | a/r/i | ...
const ALGO_COLUMN: usize = 1;
const HASHRATE_COLUMNS: [usize; 2] = [2, 3];
const SHARES_COLUMN: usize = 4;

/// Parser for BzMiner-style pipe-delimited status tables.
#[derive(Debug, Default)]
pub struct PipeTableParser;

impl LineParser for PipeTableParser {
    fn parse(&mut self, line: &str) -> ParseUpdate {
        let line = strip_ansi(line);
        let mut update = ParseUpdate::default();

        let cells = split_cells(&line);
        if let [single] = cells.as_slice() {
            update.hashrate = normalize_hashrate(single);
            return update;
        }

        // Header and separator rows have no numeric share triple.
        let Some((accepted, rejected, _invalid)) = cells.get(SHARES_COLUMN).and_then(|c| parse_shares(c))
        else {
            return update;
        };
        update.accepted = Some(Counter::Set(accepted));
        update.rejected = Some(Counter::Set(rejected));
        update.hashrate = HASHRATE_COLUMNS
            .iter()
            .filter_map(|&idx| cells.get(idx))
            .find_map(|cell| normalize_hashrate(cell));
        update.algo = cells
            .get(ALGO_COLUMN)
            .filter(|cell| is_label(cell))
            .map(|cell| cell.to_string());
        update
    }
}

fn split_cells(line: &str) -> Vec<&str> {
    let mut cells: Vec<&str> = line.split('|').map(str::trim).collect();
    if cells.len() > 1 && cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    if cells.len() > 1 && cells.first().is_some_and(|c| c.is_empty()) {
        cells.remove(0);
    }
    cells
}

/// Parses `accepted/rejected/invalid`. Placeholder parts such as `-` count
/// as zero; a part containing letters disqualifies the cell.
fn parse_shares(cell: &str) -> Option<(u64, u64, u64)> {
    let mut parts = cell.split('/');
    let (a, r, i) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let mut numeric = false;
    let mut count = |part: &str| -> Option<u64> {
        let part = part.trim();
        if part.chars().any(|c| c.is_ascii_alphanumeric()) {
            numeric = true;
            part.parse().ok()
        } else {
            Some(0)
        }
    };
    let counts = (count(a)?, count(r)?, count(i)?);
    numeric.then_some(counts)
}

fn is_label(cell: &str) -> bool {
    !cell.is_empty()
        && cell
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && cell.chars().any(|c| c.is_ascii_alphabetic())
}

/// Normalises an abbreviated hashrate such as `837.37mh` or `1.2 GH/s`
/// into `"<value> <UNIT>/s"` form.
pub fn normalize_hashrate(raw: &str) -> Option<Hashrate> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;
    let unit = HashUnit::from_rate(unit.trim_start())?;
    Some(Hashrate::new(value, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_abbreviated_units() {
        let rate = normalize_hashrate("837.37mh").unwrap();
        assert_eq!(rate.to_string(), "837.37 MH/s");
        assert_eq!(normalize_hashrate("1.5 GH/s").unwrap().to_string(), "1.5 GH/s");
        assert_eq!(normalize_hashrate("12K").unwrap().to_string(), "12 KH/s");
        assert_eq!(normalize_hashrate("3.1ph").unwrap().to_string(), "3.1 PH/s");
        assert_eq!(normalize_hashrate("2th/s").unwrap().to_string(), "2 TH/s");
    }

    #[test]
    fn rejects_lookalike_units() {
        assert!(normalize_hashrate("800mhz").is_none());
        assert!(normalize_hashrate("52").is_none());
        assert!(normalize_hashrate("-").is_none());
        assert!(normalize_hashrate("mh").is_none());
    }

    #[test]
    fn bare_hashrate_line_is_parsed() {
        let mut parser = PipeTableParser;
        let update = parser.parse("837.37mh");
        assert_eq!(update.hashrate.map(|h| h.to_string()).as_deref(), Some("837.37 MH/s"));
    }

    #[test]
    fn device_row_sets_absolute_shares() {
        let mut parser = PipeTableParser;
        let update = parser.parse("| 0 | etchash | 51.2mh | 50.9mh | 14/1/- | 62c |");
        assert_eq!(update.accepted, Some(Counter::Set(14)));
        assert_eq!(update.rejected, Some(Counter::Set(1)));
        assert_eq!(update.hashrate.unwrap().to_string(), "51.2 MH/s");
        assert_eq!(update.algo.as_deref(), Some("etchash"));
    }

    #[test]
    fn falls_back_to_second_hashrate_column() {
        let mut parser = PipeTableParser;
        let update = parser.parse("| 0 | kaspa | - | 1.1gh | -/-/0 |");
        assert_eq!(update.hashrate.unwrap().to_string(), "1.1 GH/s");
        assert_eq!(update.accepted, Some(Counter::Set(0)));
    }

    #[test]
    fn header_and_separator_rows_are_ignored() {
        let mut parser = PipeTableParser;
        assert!(parser.parse("| id | algo | hr | pool hr | a/r/i |").is_empty());
        assert!(parser.parse("|----|------|----|---------|-------|").is_empty());
        assert!(parser.parse("| - | - | - | - | -/-/- |").is_empty());
    }

    #[test]
    fn colour_codes_are_removed_before_splitting() {
        let mut parser = PipeTableParser;
        let update = parser.parse("\x1b[36m| 1 | etchash | 837.37mh | - | 3/0/0 |\x1b[0m");
        assert_eq!(update.accepted, Some(Counter::Set(3)));
        assert_eq!(update.hashrate.unwrap().to_string(), "837.37 MH/s");
    }
}
