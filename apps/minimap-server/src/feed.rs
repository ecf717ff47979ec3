//! Line-based position feed.
//!
//! Each line is `level<TAB>x<TAB>y[<TAB>angle]`. Blank lines and lines
//! starting with `#` are ignored.

use minimap_tracker::Sample;

/// Why a feed line was rejected.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("expected 3 or 4 tab-separated fields, got {0}")]
    FieldCount(usize),

    #[error("empty level name")]
    EmptyLevel,

    #[error("invalid {field} value {value:?}")]
    Number { field: &'static str, value: String },
}

/// Parses one feed line. `Ok(None)` for lines carrying no sample.
pub fn parse_line(line: &str) -> Result<Option<Sample>, FeedError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim_start().starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split('\t').collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(FeedError::FieldCount(fields.len()));
    }

    let level_name = fields[0].trim();
    if level_name.is_empty() {
        return Err(FeedError::EmptyLevel);
    }

    Ok(Some(Sample {
        level_name: level_name.to_string(),
        x: number("x", fields[1])?,
        y: number("y", fields[2])?,
        angle: match fields.get(3) {
            Some(raw) => number("angle", raw)?,
            None => 0.0,
        },
    }))
}

fn number(field: &'static str, raw: &str) -> Result<f64, FeedError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FeedError::Number {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_line() {
        let sample = parse_line("R5A1\t12.5\t-3\t90\n").unwrap().unwrap();
        assert_eq!(sample.level_name, "R5A1");
        assert_eq!(sample.x, 12.5);
        assert_eq!(sample.y, -3.0);
        assert_eq!(sample.angle, 90.0);
    }

    #[test]
    fn angle_is_optional() {
        let sample = parse_line("Cellar\t1\t2\r\n").unwrap().unwrap();
        assert_eq!(sample.angle, 0.0);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_line(""), Ok(None));
        assert_eq!(parse_line("   \r\n"), Ok(None));
        assert_eq!(parse_line("# level\tx\ty"), Ok(None));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_line("R5A1 1 2"), Err(FeedError::FieldCount(1)));
        assert_eq!(parse_line("a\t1\t2\t3\t4"), Err(FeedError::FieldCount(5)));
        assert_eq!(parse_line(" \t1\t2"), Err(FeedError::EmptyLevel));
        assert!(matches!(
            parse_line("R5A1\tabc\t2"),
            Err(FeedError::Number { field: "x", .. })
        ));
        assert!(matches!(
            parse_line("R5A1\t1\tNaN"),
            Err(FeedError::Number { field: "y", .. })
        ));
    }
}
