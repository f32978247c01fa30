use std::fmt::Display;

use crate::model::{MetadataField, MetadataValue};

/// Field name under which `.` survives sanitization.
pub const EXTENSION_FIELD: &str = "extension";

const UNSAFE_CHARACTERS: &[char] = &[
    '_', '*', '\\', '/', '<', '>', ':', '|', '"', '\'', '?', '%', '@', ';',
];

/// Turns a metadata value into a token that is safe inside a file name.
pub fn sanitize(value: impl Display, field: &str) -> String {
    let keep_dots = field == EXTENSION_FIELD;
    value
        .to_string()
        .chars()
        .map(|ch| {
            if ch.is_whitespace() || UNSAFE_CHARACTERS.contains(&ch) || (ch == '.' && !keep_dots)
            {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

pub fn sanitize_value(value: &MetadataValue, field: MetadataField) -> String {
    sanitize(value, field.name())
}
