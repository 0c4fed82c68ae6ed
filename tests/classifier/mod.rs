//! Output classification tests.

mod transcript_test;
