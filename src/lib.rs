//! Command Runner - run external commands in staged working directories and
//! supervise their output.

pub mod classifier;
pub mod config;
pub mod display;
pub mod rdfox;
pub mod supervisor;
pub mod workdir;
