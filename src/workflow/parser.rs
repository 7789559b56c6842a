//! Workflow Parser
//!
//! Handles loading workflow definitions from YAML files, resolving
//! `script_file` references into inline script bodies, and validating the
//! result before it reaches the engine.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::model::Workflow;
use super::validator::validate_workflow;

/// Loads a workflow from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Resolves `script_file` references relative to the workflow file
/// 3. Validates the workflow
///
/// # Arguments
///
/// * `path` - Path to the workflow YAML file
///
/// # Returns
///
/// * `Ok(Workflow)` - Successfully loaded and validated workflow
/// * `Err` - Read, parse, or validation error
///
/// # Example
///
/// ```rust,no_run
/// use simflow::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("simulation.yaml")?;
///     println!("Loaded {} tasks", workflow.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: &str) -> Result<Workflow, Box<dyn Error>> {
    info!("Loading workflow from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read workflow file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let base_dir = Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    parse_workflow(&yaml_content, &base_dir)
}

/// Parses a workflow from a YAML string.
///
/// `script_file` references are resolved relative to the current directory.
pub fn load_workflow_str(yaml: &str) -> Result<Workflow, Box<dyn Error>> {
    parse_workflow(yaml, Path::new("."))
}

fn parse_workflow(yaml: &str, base_dir: &Path) -> Result<Workflow, Box<dyn Error>> {
    let mut workflow: Workflow = serde_yaml::from_str(yaml).map_err(|e| {
        format!("Failed to parse workflow YAML: {}. Check the file format.", e)
    })?;

    resolve_script_files(&mut workflow, base_dir)?;
    validate_workflow(&workflow)?;

    info!(
        "Parsed workflow: {} tasks, {:?} mode, tools: {}",
        workflow.len(),
        workflow.mode,
        workflow.tools().join(", ")
    );

    Ok(workflow)
}

/// Reads each task's `script_file` (if set) into its `script` body.
///
/// Paths are resolved relative to `base_dir`, normally the directory holding
/// the workflow file, so workflows can ship alongside their scripts.
fn resolve_script_files(workflow: &mut Workflow, base_dir: &Path) -> Result<(), Box<dyn Error>> {
    for spec in &mut workflow.tasks {
        if let Some(rel) = spec.script_file.clone() {
            let script_path = base_dir.join(&rel);

            if !spec.script.trim().is_empty() {
                warn!(
                    "Task '{}' sets both script and script_file; using '{}'",
                    spec.display_name(),
                    script_path.display()
                );
            }

            spec.script = fs::read_to_string(&script_path).map_err(|e| {
                format!(
                    "Failed to read script file '{}' for task '{}': {}",
                    script_path.display(),
                    spec.display_name(),
                    e
                )
            })?;

            debug!(
                "Resolved script for task '{}' from '{}' ({} bytes)",
                spec.display_name(),
                script_path.display(),
                spec.script.len()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{ExecutionMode, FailurePolicy};

    #[test]
    fn test_load_workflow_valid_yaml() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("sim.yaml");

        let yaml_content = r#"
mode: parallel
on_failure: abort-on-failure
tasks:
  - name: poisson
    tool: fenicsx
    script: python3 poisson.py
    params:
      mesh_size: 64
  - tool: lammps
    script: lmp -in melt.in
    timeout_seconds: 120
"#;
        std::fs::write(&workflow_path, yaml_content).unwrap();

        let workflow = load_workflow(workflow_path.to_str().unwrap()).unwrap();
        assert_eq!(workflow.len(), 2);
        assert_eq!(workflow.mode, ExecutionMode::Parallel);
        assert_eq!(workflow.on_failure, FailurePolicy::AbortOnFailure);
        assert_eq!(workflow.tasks[0].display_name(), "poisson");
        assert_eq!(workflow.tasks[1].timeout_seconds, Some(120));
    }

    #[test]
    fn test_load_workflow_file_not_found() {
        let result = load_workflow("/nonexistent/path/workflow.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_workflow_invalid_yaml() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("bad.yaml");

        std::fs::write(&workflow_path, "this is not valid yaml: [[[").unwrap();

        let result = load_workflow(workflow_path.to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_workflow_validation_failure() {
        let yaml = r#"
tasks:
  - tool: ""
    script: echo hi
"#;
        let result = load_workflow_str(yaml);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty tool"));
    }

    #[test]
    fn test_load_workflow_str_empty_is_valid() {
        let workflow = load_workflow_str("tasks: []").unwrap();
        assert!(workflow.is_empty());
        assert_eq!(workflow.mode, ExecutionMode::Sequential);
    }

    #[test]
    fn test_script_file_resolved_relative_to_workflow() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let script_path = temp_dir.path().join("run.sh");
        std::fs::write(&script_path, "echo from-file\n").unwrap();

        let workflow_path = temp_dir.path().join("sim.yaml");
        let yaml_content = r#"
tasks:
  - tool: bash
    script_file: run.sh
"#;
        std::fs::write(&workflow_path, yaml_content).unwrap();

        let workflow = load_workflow(workflow_path.to_str().unwrap()).unwrap();
        assert_eq!(workflow.tasks[0].script, "echo from-file\n");
    }

    #[test]
    fn test_script_file_missing_is_an_error() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let workflow_path = temp_dir.path().join("sim.yaml");

        let yaml_content = r#"
tasks:
  - name: ghost
    tool: bash
    script_file: does_not_exist.sh
"#;
        std::fs::write(&workflow_path, yaml_content).unwrap();

        let result = load_workflow(workflow_path.to_str().unwrap());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_script_file_overrides_inline_script() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let script_path = temp_dir.path().join("real.sh");
        std::fs::write(&script_path, "echo real\n").unwrap();

        let workflow_path = temp_dir.path().join("sim.yaml");
        let yaml_content = r#"
tasks:
  - tool: bash
    script: echo inline
    script_file: real.sh
"#;
        std::fs::write(&workflow_path, yaml_content).unwrap();

        let workflow = load_workflow(workflow_path.to_str().unwrap()).unwrap();
        assert_eq!(workflow.tasks[0].script, "echo real\n");
    }
}
