//! CLI commands module.

mod bench;
mod identify;
mod index;
mod seed;
mod util;

pub use bench::BenchCommand;
pub use identify::{EnrollCommand, MatchCommand, StatsCommand};
pub use index::BuildIndexCommand;
pub use seed::SeedCommand;

pub(crate) use util::*;
