use anyhow::{Context, Result};
use serde_json::json;

use crate::cli::output::{list_table, print_json, render_list, truncate};
use crate::domain::models::{StoreConfig, Trace, TraceContext};
use crate::infrastructure::trace_codec::{rows::summarize, rows_to_trace};
use crate::infrastructure::trace_store::ObjectStoreTraceStore;

const ERROR_COLUMN_WIDTH: usize = 60;

/// Handle trace show command
pub async fn handle_show(
    store_config: &StoreConfig,
    trajectory_id: &str,
    store_override: Option<String>,
    json: bool,
) -> Result<()> {
    let mut config = store_config.clone();
    if let Some(url) = store_override {
        config.url = url;
    }
    let store = ObjectStoreTraceStore::from_config(&config)
        .with_context(|| format!("Failed to open store {}", config.url))?;

    let rows = store
        .load_rows(trajectory_id)
        .await
        .with_context(|| format!("Failed to load trace for {trajectory_id}"))?;
    let (trace, context) = rows_to_trace(&rows).context("Stored trace is invalid")?;

    if json {
        return print_json(&json!({
            "trajectory_id": trace.trajectory_id,
            "context": context,
            "summary": summarize(&rows),
            "session_end": trace.session_end,
            "evaluations": trace.evaluations,
        }));
    }

    println!("{}", render_header(&trace, &context));
    println!();
    println!("{}", render_evaluations(&trace));
    Ok(())
}

fn render_header(trace: &Trace, context: &TraceContext) -> String {
    let ended = trace.session_end.as_ref().map_or_else(
        || "in progress".to_string(),
        |end| format!("{} at {}", end.reason, end.timestamp.format("%Y-%m-%d %H:%M:%S UTC")),
    );
    let mut lines = vec![
        format!("Trajectory:  {}", trace.trajectory_id),
        format!("Environment: {}", context.environment),
        format!("Parts:       {}", trace.parts.len()),
        format!("Turns:       {}", trace.turns.len()),
        format!("Ended:       {ended}"),
    ];
    if let Some(uri) = &context.bundle_uri {
        lines.push(format!("Bundle:      {uri}"));
    }
    lines.join("\n")
}

fn render_evaluations(trace: &Trace) -> String {
    let mut table = list_table(&["commit", "part", "status", "passed", "failed", "total", "error"]);
    for (commit, record) in &trace.evaluations {
        table.add_row(vec![
            commit.clone(),
            record.part.to_string(),
            record.status.as_str().to_string(),
            record.passed.to_string(),
            record.failed.to_string(),
            record.total.to_string(),
            record
                .error
                .as_deref()
                .map(|e| truncate(e, ERROR_COLUMN_WIDTH))
                .unwrap_or_default(),
        ]);
    }
    render_list("evaluation", &table, trace.evaluations.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EvalEvent, EvalStatus, Part};

    #[test]
    fn test_render_evaluations() {
        let mut trace = Trace::new("traj-1");
        let mut part = Part::new(1);
        let mut done = EvalEvent::pending("e1", "abc123", 1, 1).update(EvalStatus::Failed);
        done.error = Some("build failed".to_string());
        part.eval_events_delta.push(done);
        trace.append_part(part);

        let rendered = render_evaluations(&trace);
        assert!(rendered.starts_with("1 evaluation:"));
        assert!(rendered.contains("abc123"));
        assert!(rendered.contains("build failed"));

        let header = render_header(&trace, &TraceContext::default());
        assert!(header.contains("in progress"));
    }

    #[tokio::test]
    async fn test_show_missing_trajectory_fails() {
        let config = StoreConfig {
            url: "memory://".to_string(),
            ..StoreConfig::default()
        };
        assert!(handle_show(&config, "missing", None, true).await.is_err());
    }
}
