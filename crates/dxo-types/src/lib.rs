//! Validated identifiers shared across the dxo crates.
//!
//! Order ids are issued by the remote analysis service; subject ids are chosen locally
//! (usually the patient name shown by the dataset source). Both end up as keys and
//! values in the persisted order ledger, so they are validated once at the boundary:
//!
//! - the value must not be blank
//! - control characters (newlines, tabs, NUL, ...) are rejected
//! - at most [`MAX_IDENTIFIER_LEN`] bytes
//!
//! User input goes through `new`, which trims surrounding whitespace first. Values read
//! back from the ledger go through `from_stored` (and serde), which keeps them exactly
//! as written.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Upper bound on identifier length, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 256;

/// Errors that can occur when constructing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    /// The input was empty or contained only whitespace
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    #[error("{kind} exceeds {max} bytes")]
    TooLong { kind: &'static str, max: usize },

    #[error("{kind} contains control characters")]
    ControlCharacter { kind: &'static str },
}

fn validate(kind: &'static str, value: &str) -> Result<(), TextError> {
    if value.trim().is_empty() {
        return Err(TextError::Empty { kind });
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(TextError::TooLong {
            kind,
            max: MAX_IDENTIFIER_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(TextError::ControlCharacter { kind });
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps `input`. The stored value is trimmed.
            pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
                let trimmed = input.as_ref().trim();
                validate($kind, trimmed)?;
                Ok(Self(trimmed.to_owned()))
            }

            /// Validates a previously persisted value and wraps it unchanged.
            ///
            /// Surrounding whitespace is kept so the value round-trips exactly.
            pub fn from_stored(value: impl Into<String>) -> Result<Self, TextError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = TextError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::from_stored(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

identifier!(
    /// Opaque identifier issued by the remote service when a job is created.
    OrderId,
    "order id"
);

identifier!(
    /// Local label for the owner of an imaging dataset (patient or dataset name).
    SubjectId,
    "subject id"
);
