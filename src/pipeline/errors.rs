use std::fmt;

/// Why a raw value failed local validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationReason {
    Required,
    NotNumeric,
    UnknownModelType,
}

impl ValidationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::NotNumeric => "not numeric",
            Self::UnknownModelType => "unknown model type",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local input failures. None of these ever reach the network.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("{column}: {reason}")]
    Validation {
        column: String,
        reason: ValidationReason,
    },
    #[error("{column}: {value:?} is not a known category")]
    Encoding { column: String, value: String },
    #[error("{column}: value must not contain ','")]
    DelimiterConflict { column: String },
}

impl InputError {
    pub(crate) fn validation(column: &str, reason: ValidationReason) -> Self {
        Self::Validation {
            column: column.to_string(),
            reason,
        }
    }

    /// Name of the offending input field.
    pub fn column(&self) -> &str {
        match self {
            Self::Validation { column, .. }
            | Self::Encoding { column, .. }
            | Self::DelimiterConflict { column } => column,
        }
    }
}
