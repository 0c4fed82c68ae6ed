//! Working directory management.
//!
//! A [`WorkingArea`] is the directory a supervised command runs in. Inputs are
//! staged into it before launch and output files are read back from it.

mod area;
mod error;
mod source;

pub use area::*;
pub use error::*;
pub use source::*;
