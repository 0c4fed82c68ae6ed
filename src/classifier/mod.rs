//! Classification of free-text process output.
//!
//! The supervised process has no structured interface, only its combined
//! output stream. [`OutputClassifier`] turns that stream, one line at a time,
//! into [`OutputEvent`]s according to a set of [`ProtocolPatterns`].

mod machine;
mod patterns;

pub use machine::*;
pub use patterns::*;
