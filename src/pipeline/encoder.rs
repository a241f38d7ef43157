//! Raw per-column input to ordered wire tokens.

use std::collections::BTreeMap;

use super::compiler::FIELD_DELIMITER;
use super::errors::{InputError, ValidationReason};
use super::schema::{CategoryEncoder, Column, FeatureSchema};
use crate::api::ModelId;

/// Raw user input keyed by column name.
pub type RawInputs = BTreeMap<String, String>;

/// Tokens for one prediction row, one per schema column in schema order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFeatures {
    model_id: ModelId,
    tokens: Vec<String>,
}

impl EncodedFeatures {
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Turns raw strings into tokens the backend understands.
///
/// Encoding is a pure function of the schema, the raw input and the
/// client-side encoding flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureEncoder {
    client_side_encoding: bool,
}

impl Default for FeatureEncoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FeatureEncoder {
    pub fn new(client_side_encoding: bool) -> Self {
        Self {
            client_side_encoding,
        }
    }

    pub fn client_side_encoding(&self) -> bool {
        self.client_side_encoding
    }

    /// Encode every schema column, failing on the first column (in schema
    /// order) that cannot be encoded.
    pub fn encode(
        &self,
        schema: &FeatureSchema,
        raw: &RawInputs,
    ) -> Result<EncodedFeatures, InputError> {
        let tokens = schema
            .columns()
            .iter()
            .map(|column| self.encode_column(schema, column, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EncodedFeatures {
            model_id: schema.model_id(),
            tokens,
        })
    }

    fn encode_column(
        &self,
        schema: &FeatureSchema,
        column: &Column,
        raw: &RawInputs,
    ) -> Result<String, InputError> {
        let value = raw
            .get(&column.name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| InputError::validation(&column.name, ValidationReason::Required))?;
        if self.client_side_encoding {
            if let Some(encoder) = schema.encoder(&column.name) {
                return encode_category(column, encoder, value);
            }
        }
        if column.dtype.is_numeric() {
            return normalize_number(value)
                .ok_or_else(|| InputError::validation(&column.name, ValidationReason::NotNumeric));
        }
        if value.contains(FIELD_DELIMITER) {
            return Err(InputError::DelimiterConflict {
                column: column.name.clone(),
            });
        }
        Ok(value.clone())
    }
}

fn encode_category(
    column: &Column,
    encoder: &CategoryEncoder,
    value: &str,
) -> Result<String, InputError> {
    encoder
        .get(value)
        .or_else(|| encoder.get(value.trim()))
        .map(|code| code.to_string())
        .ok_or_else(|| InputError::Encoding {
            column: column.name.clone(),
            value: value.to_string(),
        })
}

/// Canonical decimal form of a user-typed number, or `None` when the text is
/// not a finite number.
///
/// Thousands separators (`,`, `_` or space, in groups of three) are removed.
/// Integers drop a leading `+` and leading zeros; everything else uses the
/// shortest representation that round-trips.
pub fn normalize_number(raw: &str) -> Option<String> {
    let cleaned = strip_group_separators(raw.trim())?;
    if let Ok(int) = cleaned.parse::<i128>() {
        return Some(int.to_string());
    }
    let value = cleaned.parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(format!("{value}"))
}

fn strip_group_separators(text: &str) -> Option<String> {
    let split = text
        .find(|ch: char| matches!(ch, '.' | 'e' | 'E'))
        .unwrap_or(text.len());
    let (whole, tail) = text.split_at(split);
    let Some(separator) = whole.chars().find(|ch| matches!(ch, ',' | '_' | ' ')) else {
        return Some(text.to_string());
    };
    let (sign, digits) = if whole.starts_with(['+', '-']) {
        whole.split_at(1)
    } else {
        ("", whole)
    };
    let mut groups = digits.split(separator);
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 || !all_digits(first) {
        return None;
    }
    let mut out = String::with_capacity(text.len());
    out.push_str(sign);
    out.push_str(first);
    for group in groups {
        if group.len() != 3 || !all_digits(group) {
            return None;
        }
        out.push_str(group);
    }
    out.push_str(tail);
    Some(out)
}

fn all_digits(text: &str) -> bool {
    text.bytes().all(|byte| byte.is_ascii_digit())
}
