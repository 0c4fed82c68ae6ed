//! Process supervision: launch, output monitoring and ordered shutdown.

mod gate;
mod oneshot;
mod policy;
mod process;
mod reader;
mod report;
mod runner;
mod state;

pub use gate::*;
pub use oneshot::*;
pub use policy::*;
pub use process::*;
pub use reader::*;
pub use report::*;
pub use runner::*;
pub use state::*;
