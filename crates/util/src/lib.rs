//! Shared helpers for the skein workspace: reference-syntax parsing,
//! token scoring for registry search, retry backoff, and secret redaction.

pub mod backoff;
pub mod redact;
pub mod reference;
pub mod score;

pub use backoff::retry_delay;
pub use redact::redact_sensitive;
pub use reference::{
    StepFieldRef, format_json_value, interpolate_references, navigate_output_path, parse_secret_refs, parse_step_references,
    pure_reference,
};
pub use score::{overlap_score, tokenize};
