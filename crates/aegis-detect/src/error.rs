//! Error taxonomy (§7): rule-parse errors (per-rule, non-fatal by
//! default), engine-init errors (fatal), and runtime errors (per-signature,
//! surfaced as no-match).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing options section")]
    MissingOptions,
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("unknown keyword {0:?}")]
    UnknownKeyword(String),
    #[error("relative keyword {0:?} has no preceding anchor")]
    RelativeWithoutAnchor(String),
    #[error("within {within} is shorter than the anchor pattern ({anchor_len})")]
    WithinShorterThanAnchor { within: u32, anchor_len: u32 },
    #[error("signature declares both threshold and detection_filter")]
    ThresholdAndDetectionFilterConflict,
    #[error("signature declares two detection_filters")]
    DuplicateDetectionFilter,
    #[error("dce modifier used outside a DCERPC signature")]
    DceOutsideDcerpc,
    #[error("byte_test:dce may not combine with {0:?}")]
    DceIncompatibleModifier(String),
    #[error("conflicting app-layer protocol: already {existing:?}, keyword wants {wanted:?}")]
    AlprotoConflict { existing: String, wanted: String },
    #[error("bad content escape sequence")]
    BadContentEscape,
    #[error("invalid numeric argument for {keyword:?}: {value:?}")]
    InvalidNumericArgument { keyword: String, value: String },
    #[error("pcre pattern did not compile: {0}")]
    PcreCompile(String),
    #[error("invalid address or port spec: {0}")]
    AddressOrPort(#[from] aegis_common::AegisError),
}

#[derive(Error, Debug)]
pub enum EngineInitError {
    #[error("pattern-id store exhausted")]
    PatternIdStoreExhausted,
    #[error("radix tree structural corruption: {0}")]
    RadixCorruption(String),
    #[error("invalid engine profile: {0}")]
    InvalidProfile(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("byte extraction failed")]
    ByteExtraction,
    #[error("required app-layer state missing")]
    AppLayerMissing,
}
