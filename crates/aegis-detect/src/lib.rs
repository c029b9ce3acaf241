//! Signature parsing, grouping and per-packet detection (components C4-C7).

pub mod content;
pub mod error;
pub mod ip_only;
pub mod loader;
pub mod parser;
pub mod runtime;
pub mod sgh;
pub mod sig;
pub mod tag;
pub mod threshold;

pub use error::{EngineInitError, ParseError, RuntimeError};
pub use ip_only::{IpOnlyEngine, IpOnlyEngineBuilder};
pub use loader::{load_classification_file, load_rule_file, load_rules, ClassEntry, LoadSummary};
pub use parser::RuleParser;
pub use runtime::DetectionEngine;
pub use sgh::SignatureGroupTable;
pub use sig::{Signature, TagDirection, TagSpec};
pub use tag::{ActiveTag, TagScope, TagTable};
pub use threshold::{ThresholdTable, ThresholdVerdict};
