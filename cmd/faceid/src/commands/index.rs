//! Index building.

use std::time::Instant;

use clap::Args;

use super::{create_matcher, output_result, print_success, print_warning};
use crate::Cli;

/// Build the vector index from every identity in the store.
#[derive(Args)]
pub struct BuildIndexCommand {}

impl BuildIndexCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let matcher = create_matcher(cli)?;
        let identities = matcher.cache().refresh().await?;

        let start = Instant::now();
        let indexed = matcher.rebuild_index().await?;
        let elapsed = start.elapsed();

        match matcher.config().index_path.as_deref() {
            Some(path) if path.exists() => print_success(&format!(
                "indexed {indexed} embeddings of {identities} identities in {elapsed:?}, \
                 saved to {}",
                path.display()
            )),
            Some(path) => print_warning(&format!(
                "indexed {indexed} embeddings, but {} was not written",
                path.display()
            )),
            None => print_warning(&format!(
                "indexed {indexed} embeddings in {elapsed:?}; no index path set, nothing saved"
            )),
        }

        output_result(&matcher.stats(), cli.output.as_deref(), cli.json)
    }
}
