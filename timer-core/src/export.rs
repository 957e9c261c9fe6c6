use serde::{Deserialize, Serialize};

use crate::laps::LapRecord;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Comma,
    #[default]
    Tab,
}

impl Delimiter {
    pub fn as_str(self) -> &'static str {
        match self {
            Delimiter::Comma => ",",
            Delimiter::Tab => "\t",
        }
    }
}

/// Which columns an exported row carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowShape {
    /// `Lap, Time`: lap number and the `MM:SS.mmm` lap duration.
    #[default]
    Split,
    /// `Lap, Elapsed, Lap Time`: lap number, `HH:MM:SS` elapsed and duration.
    Detailed,
}

impl RowShape {
    fn header(self) -> &'static [&'static str] {
        match self {
            RowShape::Split => &["Lap", "Time"],
            RowShape::Detailed => &["Lap", "Elapsed", "Lap Time"],
        }
    }

    fn row(self, record: &LapRecord) -> Vec<String> {
        match self {
            RowShape::Split => vec![record.lap_number.to_string(), record.display.split.clone()],
            RowShape::Detailed => vec![
                record.lap_number.to_string(),
                record.display.elapsed.clone(),
                record.display.duration.clone(),
            ],
        }
    }
}

/// Header line followed by one line per lap, each terminated by `\n`.
pub fn to_table(records: &[LapRecord], delimiter: Delimiter, shape: RowShape) -> String {
    let sep = delimiter.as_str();
    let mut out = String::new();
    out.push_str(&shape.header().join(sep));
    out.push('\n');
    for record in records {
        out.push_str(&shape.row(record).join(sep));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laps::derive;
    use crate::state::TimerState;

    fn sample() -> Vec<LapRecord> {
        let state = TimerState {
            start_time: Some(1000),
            is_running: false,
            laps: vec![1600, 2200],
            elapsed_time: 2000,
        };
        derive(&state).unwrap()
    }

    #[test]
    fn test_split_csv() {
        let csv = to_table(&sample(), Delimiter::Comma, RowShape::Split);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["Lap,Time", "1,00:00.600", "2,00:00.600"]);
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn test_detailed_tab() {
        let table = to_table(&sample(), Delimiter::default(), RowShape::Detailed);
        assert_eq!(table, "Lap\tElapsed\tLap Time\n1\t00:00:00\t00:00:00\n2\t00:00:01\t00:00:00\n");
    }

    #[test]
    fn test_empty_is_header_only() {
        assert_eq!(to_table(&[], Delimiter::Comma, RowShape::Split), "Lap,Time\n");
        assert_eq!(to_table(&[], Delimiter::Tab, RowShape::Detailed), "Lap\tElapsed\tLap Time\n");
    }
}
