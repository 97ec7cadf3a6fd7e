//! InfluxDB line protocol, as accepted by the TSDB write endpoint.

use std::fmt::Write;

use itertools::Itertools;

use crate::point::{display_len, FieldValue, Point};
use crate::EncodingError;

const MEASUREMENT_SPECIAL: &[char] = &[',', ' ', '\\'];
const KEY_SPECIAL: &[char] = &[',', '=', ' ', '\\'];
const STRING_SPECIAL: &[char] = &['"', '\\'];

/// Serializes a batch into newline-terminated line protocol.
///
/// The buffer is sized up front from [`line_len`]; the written output must
/// match that prediction exactly.
///
/// # Errors
///
/// Returns [`EncodingError::SizeMismatch`] if the written length differs
/// from the predicted length.
pub fn encode(points: &[Point]) -> Result<String, EncodingError> {
    let expected = points.iter().map(line_len).fold(0usize, usize::saturating_add);

    let mut buf = String::with_capacity(expected);
    for point in points {
        write_point(&mut buf, point);
    }

    match buf.len() == expected {
        true => Ok(buf),
        false => Err(EncodingError::SizeMismatch { expected, actual: buf.len() }),
    }
}

/// Extracts the distinct series names from a line protocol buffer in
/// first-seen order.
///
/// Only lines carrying at least one tag (a comma after the measurement)
/// contribute a name.
#[must_use]
pub fn series_names(buf: &str) -> Vec<String> {
    buf.lines()
        .filter(|line| !line.is_empty())
        .filter_map(tagged_measurement)
        .unique()
        .collect()
}

fn tagged_measurement(line: &str) -> Option<String> {
    let mut name = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => name.push(chars.next()?),
            ',' => return Some(name),
            ' ' => return None,
            _ => name.push(c),
        }
    }

    None
}

/// Exact byte length [`write_point`] will produce for `point`.
pub(crate) fn line_len(point: &Point) -> usize {
    let fields = point.fields.iter().filter(|(_, value)| value.is_writable());
    let (field_count, field_bytes) = fields.fold((0usize, 0usize), |(count, bytes), (k, v)| {
        (
            count.saturating_add(1),
            bytes
                .saturating_add(escaped_len(k, KEY_SPECIAL))
                .saturating_add(1)
                .saturating_add(field_value_len(v)),
        )
    });
    if field_count == 0 {
        return 0;
    }

    let tag_bytes = point.tags.iter().fold(0usize, |bytes, (k, v)| {
        bytes
            .saturating_add(2)
            .saturating_add(escaped_len(k, KEY_SPECIAL))
            .saturating_add(escaped_len(v, KEY_SPECIAL))
    });

    // Separators: commas between fields, two spaces, trailing newline.
    escaped_len(&point.name, MEASUREMENT_SPECIAL)
        .saturating_add(tag_bytes)
        .saturating_add(field_bytes)
        .saturating_add(field_count.saturating_sub(1))
        .saturating_add(2)
        .saturating_add(display_len(&point.timestamp_ns))
        .saturating_add(1)
}

pub(crate) fn write_point(buf: &mut String, point: &Point) {
    let mut fields = point
        .fields
        .iter()
        .filter(|(_, value)| value.is_writable())
        .peekable();
    if fields.peek().is_none() {
        return;
    }

    escape(buf, &point.name, MEASUREMENT_SPECIAL);
    for (key, value) in &point.tags {
        buf.push(',');
        escape(buf, key, KEY_SPECIAL);
        buf.push('=');
        escape(buf, value, KEY_SPECIAL);
    }

    buf.push(' ');
    for (i, (key, value)) in fields.enumerate() {
        if i > 0 {
            buf.push(',');
        }
        escape(buf, key, KEY_SPECIAL);
        buf.push('=');
        write_field_value(buf, value);
    }

    let _ = writeln!(buf, " {}", point.timestamp_ns);
}

fn write_field_value(buf: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Integer(v) => {
            let _ = write!(buf, "{v}i");
        }
        FieldValue::Unsigned(v) => {
            let _ = write!(buf, "{v}u");
        }
        FieldValue::Float(v) => {
            let _ = write!(buf, "{v}");
        }
        FieldValue::Boolean(v) => {
            let _ = write!(buf, "{v}");
        }
        FieldValue::String(v) => {
            buf.push('"');
            escape(buf, v, STRING_SPECIAL);
            buf.push('"');
        }
    }
}

fn field_value_len(value: &FieldValue) -> usize {
    match value {
        FieldValue::Integer(_) | FieldValue::Unsigned(_) => display_len(value).saturating_add(1),
        FieldValue::Float(_) | FieldValue::Boolean(_) => display_len(value),
        FieldValue::String(v) => escaped_len(v, STRING_SPECIAL).saturating_add(2),
    }
}

fn escape(buf: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            buf.push('\\');
        }
        buf.push(c);
    }
}

fn escaped_len(s: &str, special: &[char]) -> usize {
    s.len()
        .saturating_add(s.chars().filter(|c| special.contains(c)).count())
}
