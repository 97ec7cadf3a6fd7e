//! Tab-separated records accepted by the pipeline data endpoint.
//!
//! Every distinct timestamp in a batch becomes one line. Each point in the
//! group contributes `<series>_<key>=<value>\t` pairs (tags first, then
//! fields), and the line is closed by `timestamp=<ns>`:
//!
//! ```text
//! cpu_host=h1\tcpu_usage=0.5\tmem_host=h1\tmem_free=1024\ttimestamp=1000
//! ```

use std::fmt::Write;

use hashbrown::HashMap;

use crate::point::{display_len, Point};
use crate::EncodingError;

pub(crate) const TIMESTAMP_KEY: &str = "timestamp";

/// Serializes a batch into pipeline records, one line per timestamp.
///
/// Line order across timestamps is unspecified. Points without a writable
/// field contribute nothing, not even their tags.
///
/// # Errors
///
/// Returns [`EncodingError::SizeMismatch`] if the written length differs
/// from the predicted length.
pub fn encode(points: &[Point]) -> Result<String, EncodingError> {
    let mut groups: HashMap<i64, Vec<&Point>> = HashMap::new();
    for point in points.iter().filter(|point| point.has_writable_fields()) {
        groups.entry(point.timestamp_ns).or_default().push(point);
    }

    let expected = groups
        .iter()
        .map(|(timestamp, group)| {
            group
                .iter()
                .map(|point| pairs_len(point))
                .fold(0usize, usize::saturating_add)
                .saturating_add(TIMESTAMP_KEY.len())
                .saturating_add(display_len(timestamp))
                .saturating_add(2)
        })
        .fold(0usize, usize::saturating_add);

    let mut buf = String::with_capacity(expected);
    for (timestamp, group) in &groups {
        for point in group {
            write_pairs(&mut buf, point);
        }
        let _ = writeln!(buf, "{TIMESTAMP_KEY}={timestamp}");
    }

    match buf.len() == expected {
        true => Ok(buf),
        false => Err(EncodingError::SizeMismatch { expected, actual: buf.len() }),
    }
}

/// A single record line split back into its pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub pairs: Vec<(String, String)>,
    pub timestamp_ns: i64,
}

/// Parses one record line as produced by [`encode`].
///
/// # Errors
///
/// Returns [`EncodingError::MalformedRecord`] if a pair lacks `=` or the line
/// does not end with a valid `timestamp=<ns>` pair.
pub fn parse_line(line: &str) -> Result<ParsedRecord, EncodingError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let (body, timestamp) = match line.rsplit_once('\t') {
        Some((body, last)) => (Some(body), last),
        None => (None, line),
    };

    let timestamp_ns = timestamp
        .strip_prefix(TIMESTAMP_KEY)
        .and_then(|rest| rest.strip_prefix('='))
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| EncodingError::MalformedRecord(line.to_string()))?;

    let pairs = body
        .into_iter()
        .flat_map(|body| body.split('\t'))
        .map(|pair| {
            pair.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| EncodingError::MalformedRecord(line.to_string()))
        })
        .collect::<Result<_, _>>()?;

    Ok(ParsedRecord { pairs, timestamp_ns })
}

/// Repo-wide key of `key` belonging to `series`.
///
/// Characters that would break record framing (`\t`, `\n`, `=`) are replaced
/// with `_`.
pub(crate) fn namespaced_key(series: &str, key: &str) -> String {
    let mut out = String::with_capacity(series.len().saturating_add(key.len()).saturating_add(1));
    push_sanitized(&mut out, series, '_', true);
    out.push('_');
    push_sanitized(&mut out, key, '_', true);

    out
}

fn write_pairs(buf: &mut String, point: &Point) {
    for (key, value) in &point.tags {
        write_pair(buf, &point.name, key, value);
    }
    for (key, value) in point.fields.iter().filter(|(_, value)| value.is_writable()) {
        write_pair(buf, &point.name, key, value);
    }
}

fn write_pair(buf: &mut String, series: &str, key: &str, value: &impl std::fmt::Display) {
    push_sanitized(buf, series, '_', true);
    buf.push('_');
    push_sanitized(buf, key, '_', true);
    buf.push('=');

    // Values only need to stay on one line and inside their column.
    let start = buf.len();
    let _ = write!(buf, "{value}");
    if buf[start..].contains(['\t', '\n']) {
        let value = buf.split_off(start);
        push_sanitized(buf, &value, ' ', false);
    }
    buf.push('\t');
}

fn pairs_len(point: &Point) -> usize {
    let series = point.name.len();
    let tags = point.tags.iter().map(|(key, value)| (key.len(), value.len()));
    let fields = point
        .fields
        .iter()
        .filter(|(_, value)| value.is_writable())
        .map(|(key, value)| (key.len(), display_len(value)));

    // `<series>_<key>=<value>\t`
    tags.chain(fields)
        .map(|(key, value)| series.saturating_add(key).saturating_add(value).saturating_add(3))
        .fold(0usize, usize::saturating_add)
}

fn push_sanitized(buf: &mut String, s: &str, replacement: char, is_key: bool) {
    for c in s.chars() {
        match c {
            '\t' | '\n' => buf.push(replacement),
            '=' if is_key => buf.push(replacement),
            _ => buf.push(c),
        }
    }
}
