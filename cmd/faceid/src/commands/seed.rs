//! Random identity generation.

use clap::Args;
use faceid::{Identity, IdentityRecord, MAX_EMBEDDINGS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{get_config, open_store, print_success, print_verbose};
use crate::Cli;

/// Replace the identity store with random identities.
///
/// Each identity gets a random centre and `per` embeddings scattered
/// tightly around it, so captures of one person stay within the threshold.
#[derive(Args)]
pub struct SeedCommand {
    /// Number of identities
    #[arg(short = 'n', long, default_value_t = 1000)]
    count: usize,

    /// Embeddings per identity
    #[arg(long, default_value_t = MAX_EMBEDDINGS)]
    per: usize,

    /// Random seed
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Per-value jitter between captures of the same person
    #[arg(long, default_value_t = 0.01)]
    jitter: f32,
}

impl SeedCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let cfg = get_config(cli)?;
        if self.per == 0 || self.per > MAX_EMBEDDINGS {
            anyhow::bail!("--per must be within 1..={MAX_EMBEDDINGS}");
        }
        if self.jitter.is_nan() || self.jitter < 0.0 {
            anyhow::bail!("--jitter must not be negative");
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let records: Vec<IdentityRecord> = (0..self.count)
            .map(|i| {
                let centre: Vec<f32> = (0..cfg.dimension)
                    .map(|_| rng.gen_range(-0.2f32..0.2))
                    .collect();
                let embeddings = (0..self.per)
                    .map(|_| {
                        centre
                            .iter()
                            .map(|v| *v + rng.gen_range(-self.jitter..=self.jitter))
                            .collect()
                    })
                    .collect();
                let identity = Identity::new(format!("person-{i:06}"), format!("Person {i}"))
                    .with_embeddings(embeddings)
                    .with_sort_order(i as i32);
                IdentityRecord::from(&identity)
            })
            .collect();

        let store = open_store(cli);
        print_verbose(cli, &format!("writing {}", store.path().display()));
        store.write_all(&records).await?;

        print_success(&format!(
            "seeded {} identities x {} embeddings into {}",
            self.count,
            self.per,
            store.path().display()
        ));
        Ok(())
    }
}
