use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};

use crate::cli::output::print_json;
use crate::domain::models::Config;
use crate::services::diagnostics::{
    attach_test_sources, DiagnosticExtractor, FallbackClassifier, PayloadEnricher, TestSourceIndex,
};
use crate::services::{FeedbackBuilder, FeedbackPriority};

/// Overrides from the command line.
#[derive(Debug, Default)]
pub struct FeedbackArgs {
    pub priority: Vec<String>,
    pub limit: Option<usize>,
    pub max_block_chars: Option<usize>,
    pub sources: Option<std::path::PathBuf>,
}

fn read_payload(path: &Path) -> Result<Map<String, Value>> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload {}", path.display()))?
    };
    match serde_json::from_str(&text).context("Payload is not valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("Payload must be a JSON object"),
    }
}

/// Enrich `payload` in place and render its feedback section.
pub fn render(config: &Config, args: &FeedbackArgs, payload: &mut Map<String, Value>) -> Result<(String, usize)> {
    if let Some(dir) = &args.sources {
        let index = TestSourceIndex::from_dir(dir)
            .with_context(|| format!("Failed to index test sources in {}", dir.display()))?;
        let attached = attach_test_sources(payload, &index);
        tracing::debug!(attached, "attached test sources");
    }

    let extractor = DiagnosticExtractor::new(FallbackClassifier::new(
        config.diagnostics.compile_markers.clone(),
    ));
    let enricher = PayloadEnricher::new(extractor, config.diagnostics.cluster_sample_cap);
    enricher.enrich(payload);

    let mut builder = FeedbackBuilder::from_config(&config.feedback).with_enricher(enricher);
    if !args.priority.is_empty() {
        builder.priority = FeedbackPriority::new(args.priority.iter().cloned());
    }
    if let Some(limit) = args.limit {
        builder.limit = limit;
    }
    if let Some(max) = args.max_block_chars {
        builder.max_block_chars = max;
    }

    let (section, selected) = builder.build(payload);
    Ok((section, selected.len()))
}

/// Handle the feedback command
pub fn execute(config: &Config, payload_path: &Path, args: &FeedbackArgs, json: bool) -> Result<()> {
    let mut payload = read_payload(payload_path)?;
    let (section, shown) = render(config, args, &mut payload)?;

    if json {
        return print_json(&json!({
            "section": section,
            "shown": shown,
            "diagnostic_clusters": payload.get("diagnostic_clusters").cloned().unwrap_or(Value::Array(Vec::new())),
        }));
    }
    println!("{section}");
    Ok(())
}
