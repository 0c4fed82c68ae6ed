//! Working area tests.
