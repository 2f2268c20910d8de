use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cli::output::{list_table, print_json, render_list, truncate};
use crate::domain::models::ParamSpace;
use crate::services::{plan_runs, PlanRequest, RunPlan, SamplingMode};

const PARAMS_COLUMN_WIDTH: usize = 100;

/// Read a YAML parameter space.
pub fn load_param_space(path: &Path) -> Result<ParamSpace> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read param space {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse param space {}", path.display()))
}

/// Handle the plan command
pub fn execute(
    space_path: &Path,
    mode: SamplingMode,
    runs: usize,
    seed: Option<u64>,
    assignments: Vec<(String, Value)>,
    json: bool,
) -> Result<()> {
    let space = load_param_space(space_path)?;
    let request = PlanRequest {
        mode,
        run_count: runs,
        seed,
        manual: assignments.into_iter().collect(),
    };
    let plans = plan_runs(&space, &request).context("Failed to plan runs")?;
    tracing::debug!(mode = ?mode, runs = plans.len(), "planned runs");

    if json {
        return print_json(&plans);
    }
    println!("{}", render_plans(&plans));
    Ok(())
}

fn render_plans(plans: &[RunPlan]) -> String {
    let mut table = list_table(&["run", "replica", "params"]);
    for plan in plans {
        let params = serde_json::to_string(&plan.params).unwrap_or_default();
        table.add_row(vec![
            plan.run_index.to_string(),
            plan.replica.to_string(),
            truncate(&params, PARAMS_COLUMN_WIDTH),
        ]);
    }
    render_list("run", &table, plans.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPACE: &str = r"
dimensions:
  - key: lang
    kind: enum
    options: [c, rust]
  - key: level
    kind: int
    min: 1
    max: 2
";

    #[test]
    fn test_load_param_space() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.yaml");
        std::fs::write(&path, SPACE).unwrap();

        let space = load_param_space(&path).unwrap();
        assert_eq!(space.dimensions.len(), 2);
        assert_eq!(space.dimensions[1].key, "level");
    }

    #[test]
    fn test_load_param_space_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.yaml");
        std::fs::write(&path, "dimensions: []\nextra: 1\n").unwrap();
        assert!(load_param_space(&path).is_err());
    }

    #[test]
    fn test_render_plans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("space.yaml");
        std::fs::write(&path, SPACE).unwrap();
        let space = load_param_space(&path).unwrap();

        let plans = plan_runs(&space, &PlanRequest::default()).unwrap();
        let rendered = render_plans(&plans);
        assert!(rendered.starts_with("4 runs:"));
        assert!(rendered.contains("\"lang\":\"rust\""));
    }
}
