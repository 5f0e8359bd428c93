//! Utility functions for CLI commands.

use std::path::Path;
use std::sync::Arc;

use faceid::{
    Embedding, FaceMatcher, IdentityStore, JsonFileStore, MatcherConfig, decode_embedding,
};

use crate::Cli;

/// Loads a request from a YAML or JSON file.
pub fn load_request<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)?;
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("yaml");

    let result = match ext.to_lowercase().as_str() {
        "json" => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };

    Ok(result)
}

/// Resolves the matcher config from --config and --index.
pub fn get_config(cli: &Cli) -> anyhow::Result<MatcherConfig> {
    let mut cfg = match cli.config.as_deref() {
        Some(path) => load_request::<MatcherConfig>(path)?,
        None => MatcherConfig::default(),
    };
    if let Some(index) = cli.index.as_deref() {
        cfg.index_path = Some(index.into());
    }
    cfg.validate()?;
    Ok(cfg)
}

pub fn open_store(cli: &Cli) -> JsonFileStore {
    JsonFileStore::new(&cli.store)
}

/// Creates a matcher over the store. Call `bootstrap` before matching.
pub fn create_matcher(cli: &Cli) -> anyhow::Result<FaceMatcher> {
    let cfg = get_config(cli)?;
    let store: Arc<dyn IdentityStore> = Arc::new(open_store(cli));
    Ok(FaceMatcher::new(cfg, store)?)
}

/// Reads an embedding from a JSON array file or a raw little-endian f32 file.
pub fn read_embedding(path: &str, dim: usize) -> anyhow::Result<Embedding> {
    let is_json = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        let embedding: Embedding = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if embedding.len() != dim {
            anyhow::bail!("embedding has {} values, expected {dim}", embedding.len());
        }
        return Ok(embedding);
    }
    Ok(decode_embedding(&std::fs::read(path)?, dim)?)
}

/// Outputs result as JSON or YAML.
pub fn output_result<T: serde::Serialize>(
    result: &T,
    output_path: Option<&str>,
    as_json: bool,
) -> anyhow::Result<()> {
    let output = if as_json {
        serde_json::to_string_pretty(result)?
    } else {
        serde_yaml::to_string(result)?
    };

    match output_path {
        Some(path) => std::fs::write(path, output)?,
        None => print!("{}", output),
    }

    Ok(())
}

/// Prints verbose output if enabled.
pub fn print_verbose(cli: &Cli, msg: &str) {
    if cli.verbose {
        eprintln!("[verbose] {}", msg);
    }
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}

/// Prints info message.
pub fn print_info(msg: &str) {
    eprintln!("\x1b[34mℹ\x1b[0m {}", msg);
}

/// Prints warning message.
pub fn print_warning(msg: &str) {
    eprintln!("\x1b[33m⚠\x1b[0m {}", msg);
}
