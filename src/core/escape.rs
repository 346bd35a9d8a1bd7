// FlightDeck - core/escape.rs
//
// Field codec for the legacy pipe-delimited profile line.
//
// Two dialects exist on disk:
//   - `PipeOnly`  what the first desktop client wrote: `|` becomes `\|` and
//                 nothing else is touched, so backslashes are plain data.
//   - `Full`      backslash becomes `\\`, pipe `\|`, CR/LF `\r`/`\n`, so
//                 every value round-trips, including a trailing backslash.
//
// Decoding scans left to right and only an unescaped `|` ends a field.
// In `Full`, an unknown escape such as `\q` decodes to itself.

use crate::util::constants::{LEGACY_DELIMITER, LEGACY_ESCAPE};

/// Escaping rules of a legacy profile file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Pipes only. Files from the original client use this.
    #[default]
    PipeOnly,
    /// Backslash, pipe, CR and LF.
    Full,
}

/// Escape one field value with the `Full` rules.
pub fn escape_field(value: &str) -> String {
    escape_field_as(value, Dialect::Full)
}

/// Escape one field value for the given dialect.
pub fn escape_field_as(value: &str, dialect: Dialect) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match (dialect, c) {
            (_, LEGACY_DELIMITER) => {
                out.push(LEGACY_ESCAPE);
                out.push(LEGACY_DELIMITER);
            }
            (Dialect::Full, LEGACY_ESCAPE) => out.push_str("\\\\"),
            (Dialect::Full, '\n') => out.push_str("\\n"),
            (Dialect::Full, '\r') => out.push_str("\\r"),
            (_, other) => out.push(other),
        }
    }
    out
}

/// Reverse `escape_field` for a single, already separated field.
pub fn unescape_field(raw: &str) -> String {
    unescape_field_as(raw, Dialect::Full)
}

/// Reverse `escape_field_as` for a single, already separated field.
pub fn unescape_field_as(raw: &str, dialect: Dialect) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == LEGACY_ESCAPE {
            push_escaped(&mut out, &mut chars, dialect);
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape every field with the `Full` rules and join them.
pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> String {
    join_fields_as(fields, Dialect::Full)
}

/// Escape every field for `dialect` and join them with the delimiter.
pub fn join_fields_as<S: AsRef<str>>(fields: &[S], dialect: Dialect) -> String {
    fields
        .iter()
        .map(|f| escape_field_as(f.as_ref(), dialect))
        .collect::<Vec<_>>()
        .join(&LEGACY_DELIMITER.to_string())
}

/// Split a `Full` line on unescaped delimiters and unescape each field.
pub fn split_fields(line: &str) -> Vec<String> {
    split_fields_as(line, Dialect::Full)
}

/// Split a line on unescaped delimiters and unescape each field.
///
/// A sentinel delimiter is appended first so the final field is terminated
/// like every other one. Text after the last unescaped delimiter (possible
/// only when the line ends in a lone backslash) is discarded.
pub fn split_fields_as(line: &str, dialect: Dialect) -> Vec<String> {
    let mut input = String::with_capacity(line.len() + 1);
    input.push_str(line);
    input.push(LEGACY_DELIMITER);

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == LEGACY_ESCAPE {
            push_escaped(&mut current, &mut chars, dialect);
        } else if c == LEGACY_DELIMITER {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields
}

/// Decode the sequence following a backslash. In `PipeOnly` only `\|` is
/// an escape; any other backslash is kept and the next char is left for
/// the caller.
fn push_escaped<I>(out: &mut String, chars: &mut std::iter::Peekable<I>, dialect: Dialect)
where
    I: Iterator<Item = char>,
{
    match (dialect, chars.peek().copied()) {
        (_, Some(LEGACY_DELIMITER)) => {
            chars.next();
            out.push(LEGACY_DELIMITER);
        }
        (Dialect::PipeOnly, _) | (Dialect::Full, None) => out.push(LEGACY_ESCAPE),
        (Dialect::Full, Some(next)) => {
            chars.next();
            match next {
                LEGACY_ESCAPE => out.push(LEGACY_ESCAPE),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                other => {
                    out.push(LEGACY_ESCAPE);
                    out.push(other);
                }
            }
        }
    }
}

// =============================================================================
// Unit tests
// =============================================================================
