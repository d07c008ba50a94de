//! The error taxonomy for declaration, parse and pack failures.
//!
//! Every variant here corresponds to one of the named errors a declarative
//! binary-struct engine surfaces to callers. Declaration-time variants
//! (`DuplicateField`, `BitfieldWidthMismatch`, `NoClassifier`,
//! `CycleInDerivation`) are raised from builder `.build()` calls and never
//! from `parse`/`to_bytes`. Runtime variants are raised from `parse`,
//! `to_bytes`, attribute access, and user callbacks.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// The return type of every user-supplied callback (`size`, `prepack`,
/// `init`, `criteria`, `classifier`, `formatter`). A callback may fail with
/// any boxed error; the engine wraps it in a [`CallbackError`] that records
/// which callback ran and where, before it reaches the caller of
/// `parse`/`to_bytes`/`dump`.
pub type CallbackResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

/// Identifies which user-supplied callback failed inside a [`CallbackError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Size,
    Prepack,
    Init,
    Criteria,
    Classifier,
    Formatter,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallbackKind::Size => "size",
            CallbackKind::Prepack => "prepack",
            CallbackKind::Init => "init",
            CallbackKind::Criteria => "criteria",
            CallbackKind::Classifier => "classifier",
            CallbackKind::Formatter => "formatter",
        };
        f.write_str(s)
    }
}

/// A user callback (`size`, `prepack`, `init`, `criteria`, `classifier` or
/// `formatter`) raised an error while parsing, packing or dumping a value.
#[derive(Debug)]
pub struct CallbackError {
    pub kind: CallbackKind,
    pub field_path: String,
    pub cause: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} callback failed at `{}`: {}",
            self.kind, self.field_path, self.cause
        )
    }
}

impl std::error::Error for CallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("insufficient bytes at `{field_path}`: needed {needed}, only {available} available")]
    InsufficientBytes {
        field_path: String,
        needed: usize,
        available: usize,
    },

    #[error("size callback for `{field_path}` returned {declared}, smaller than the fixed prefix of {minimum} bytes")]
    SizeUnderflow {
        field_path: String,
        declared: usize,
        minimum: usize,
    },

    #[error("`{type_name}` has no field named `{name}`")]
    UnknownField { type_name: String, name: String },

    #[error("`{field_path}` is declared with a duplicate name `{name}` (already used by an inherited or embedded field)")]
    DuplicateField { field_path: String, name: String },

    #[error("value {value} at `{field_path}` overflows its {width_bits}-bit field")]
    FieldWidthOverflow {
        field_path: String,
        value: i128,
        width_bits: u32,
    },

    #[error("bitfield `{type_name}` sub-field widths sum to {declared_sum} bits, backing integer is {backing_width} bits")]
    BitfieldWidthMismatch {
        type_name: String,
        declared_sum: u32,
        backing_width: u32,
    },

    #[error("ambiguous derived dispatch under `{base}`: {candidates:?} all match")]
    AmbiguousDerived { base: String, candidates: Vec<String> },

    #[error("`{derived}` declares `classifyby` but its base has no `classifier`")]
    NoClassifier { derived: String },

    #[error("`{type_name}` derives from itself, directly or transitively")]
    CycleInDerivation { type_name: String },

    #[error(transparent)]
    Callback(#[from] CallbackError),
}

impl Error {
    /// Wraps a boxed error returned by a user callback (`CallbackResult`'s
    /// error side) without double-boxing it.
    pub(crate) fn callback_from_box(
        kind: CallbackKind,
        field_path: impl Into<String>,
        cause: Box<dyn std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        Error::Callback(CallbackError {
            kind,
            field_path: field_path.into(),
            cause,
        })
    }
}
