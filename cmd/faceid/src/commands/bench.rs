//! Exact vs index comparison on the current store.

use std::time::{Duration, Instant};

use clap::Args;
use faceid::{ExactMatcher, nearest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::{create_matcher, output_result, print_info, print_verbose};
use crate::Cli;

/// Compare exact and indexed matching on noisy copies of stored embeddings.
#[derive(Args)]
pub struct BenchCommand {
    /// Number of queries
    #[arg(short = 'n', long, default_value_t = 200)]
    queries: usize,

    /// Per-value noise added to each query
    #[arg(long, default_value_t = 0.01)]
    noise: f32,

    /// Random seed
    #[arg(long, default_value_t = 7)]
    seed: u64,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    identities: usize,
    embeddings: usize,
    queries: usize,
    /// Share of queries where the index top-1 is the true nearest identity.
    agreement: f64,
    exact_recognized: usize,
    index_recognized: usize,
    build_ms: u128,
    exact_avg_us: f64,
    index_avg_us: f64,
}

impl BenchCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        if self.noise.is_nan() || self.noise < 0.0 {
            anyhow::bail!("--noise must not be negative");
        }
        let matcher = create_matcher(cli)?;
        matcher.cache().refresh().await?;
        let identities = matcher.cache().get();
        let with_embeddings: Vec<_> = identities.iter().filter(|i| i.has_embeddings()).collect();
        if with_embeddings.is_empty() {
            anyhow::bail!("store {} has no embeddings, run `faceid seed` first", cli.store);
        }

        let start = Instant::now();
        let embeddings = matcher.rebuild_index().await?;
        let build_ms = start.elapsed().as_millis();
        print_info(&format!("index built over {embeddings} embeddings in {build_ms} ms"));

        let exact = ExactMatcher::new(matcher.config().threshold);
        matcher.set_index_enabled(true);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut agree = 0;
        let mut exact_recognized = 0;
        let mut index_recognized = 0;
        let mut exact_time = Duration::ZERO;
        let mut index_time = Duration::ZERO;

        for q in 0..self.queries {
            let identity = with_embeddings[rng.gen_range(0..with_embeddings.len())];
            let base = &identity.embeddings[rng.gen_range(0..identity.embeddings.len())];
            let query: Vec<f32> = base
                .iter()
                .map(|v| *v + rng.gen_range(-self.noise..=self.noise))
                .collect();

            let t = Instant::now();
            let exact_result = exact.search(&query, &identities);
            exact_time += t.elapsed();

            let t = Instant::now();
            let index_result = matcher.match_face(&query, &identities);
            index_time += t.elapsed();

            exact_recognized += exact_result.is_ok() as usize;
            index_recognized += index_result.is_ok() as usize;

            let truth = nearest(&query, &identities).map(|(i, _)| i.id.clone());
            let top = matcher
                .index()
                .search_knn(&query, 1)?
                .into_iter()
                .next()
                .map(|m| m.identity_id);
            if truth == top {
                agree += 1;
            } else {
                print_verbose(cli, &format!("query {q}: exact {truth:?}, index {top:?}"));
            }
        }

        let n = self.queries.max(1) as f64;
        let report = BenchReport {
            identities: identities.len(),
            embeddings,
            queries: self.queries,
            agreement: agree as f64 / n,
            exact_recognized,
            index_recognized,
            build_ms,
            exact_avg_us: exact_time.as_secs_f64() * 1e6 / n,
            index_avg_us: index_time.as_secs_f64() * 1e6 / n,
        };
        output_result(&report, cli.output.as_deref(), cli.json)
    }
}
