//! Matching, enrollment and statistics commands.

use std::time::Instant;

use clap::Args;
use faceid::MatchMode;
use serde::Serialize;

use super::{
    create_matcher, output_result, print_info, print_success, print_warning, read_embedding,
};
use crate::Cli;

/// Identify the face in an embedding file (JSON array or raw f32).
#[derive(Args)]
pub struct MatchCommand {
    /// Embedding file
    embedding: String,

    /// Scan exactly even when the index is available
    #[arg(long)]
    exact: bool,
}

#[derive(Debug, Serialize)]
struct MatchOutput {
    recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    mode: MatchMode,
    elapsed_us: u128,
}

impl MatchCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let matcher = create_matcher(cli)?;
        let query = read_embedding(&self.embedding, matcher.config().dimension)?;
        matcher.bootstrap().await?;
        if self.exact {
            matcher.set_index_enabled(false);
        }
        let mode = matcher.mode();

        let start = Instant::now();
        let result = matcher.identify(query).await;
        let elapsed_us = start.elapsed().as_micros();

        let output = match result {
            Ok(m) => {
                print_success(&format!("matched {} ({})", m.identity.name, m.identity.id));
                MatchOutput {
                    recognized: true,
                    confidence: Some(m.confidence()),
                    distance: Some(m.distance),
                    id: Some(m.identity.id),
                    name: Some(m.identity.name),
                    mode,
                    elapsed_us,
                }
            }
            Err(e) if e.is_not_recognized() => {
                print_warning(&e.to_string());
                let distance = match e {
                    faceid::FaceIdError::NotRecognized { distance } => distance,
                    _ => None,
                };
                MatchOutput {
                    recognized: false,
                    id: None,
                    name: None,
                    distance,
                    confidence: None,
                    mode,
                    elapsed_us,
                }
            }
            Err(e) => return Err(e.into()),
        };

        output_result(&output, cli.output.as_deref(), cli.json)
    }
}

/// Add an embedding to an identity, creating it if needed.
#[derive(Args)]
pub struct EnrollCommand {
    /// Identity id
    id: String,

    /// Display name
    name: String,

    /// Embedding file (JSON array or raw f32)
    embedding: String,
}

impl EnrollCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let matcher = create_matcher(cli)?;
        let embedding = read_embedding(&self.embedding, matcher.config().dimension)?;
        matcher.bootstrap().await?;

        let identity = matcher.enroll(&self.id, &self.name, embedding).await?;
        print_success(&format!(
            "enrolled {} ({}), {} embeddings stored",
            identity.name,
            identity.id,
            identity.embeddings.len()
        ));
        if matcher.stats().pending_inserts > 0 {
            print_info("index changes are saved at the next checkpoint or build-index");
        }
        Ok(())
    }
}

/// Show cache and index statistics.
#[derive(Args)]
pub struct StatsCommand {}

impl StatsCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let matcher = create_matcher(cli)?;
        matcher.bootstrap().await?;
        output_result(&matcher.stats(), cli.output.as_deref(), cli.json)
    }
}
