//! Running RDFox under the process supervisor.
//!
//! RDFox is driven through its shell: inputs are staged next to a generated
//! master script, the shell executes it in a sandbox, and its output is
//! classified with the RDFox-specific [`rdfox_patterns`]. When the script
//! starts the REST endpoint, the reported port is handed to an [`Endpoint`].

mod endpoint;
mod protocol;
mod runner;

pub use endpoint::*;
pub use protocol::*;
pub use runner::*;
