//! Workflow Validation
//!
//! Checks workflows before submission so broken specs fail fast instead of
//! surfacing later as worker errors.
//!
//! An empty workflow is deliberately valid: it has nothing to submit and
//! completes immediately as a success.

use std::collections::HashSet;

use log::{debug, warn};
use thiserror::Error;

use super::model::{TaskSpec, Workflow};

/// Problems detected while validating a workflow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("task '{0}' has an empty tool name")]
    EmptyTool(String),

    #[error("task '{0}' has an empty script (set `script` or let the loader resolve `script_file`)")]
    EmptyScript(String),

    #[error("duplicate task name '{0}'")]
    DuplicateName(String),

    #[error("task '{name}' has parameters that cannot be encoded as JSON: {reason}")]
    UnencodableParams { name: String, reason: String },
}

/// Validates a single task spec.
///
/// The script must already be resolved: `script_file` indirection is the
/// workflow loader's job, and a spec that still has an empty script here is
/// rejected rather than silently submitted.
pub fn validate_spec(spec: &TaskSpec) -> Result<(), ValidationError> {
    let label = spec.display_name().to_string();

    if spec.tool.trim().is_empty() {
        return Err(ValidationError::EmptyTool(label));
    }

    if spec.script.trim().is_empty() {
        return Err(ValidationError::EmptyScript(label));
    }

    if let Err(e) = serde_json::to_string(&spec.params) {
        return Err(ValidationError::UnencodableParams {
            name: label,
            reason: e.to_string(),
        });
    }

    if spec.timeout_seconds == Some(0) {
        warn!("Task '{}' has a zero-second timeout and will expire immediately", label);
    }

    Ok(())
}

/// Validates every task in a workflow and checks that explicit task names
/// are unique.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ValidationError> {
    debug!("Validating workflow with {} tasks", workflow.tasks.len());

    let mut seen: HashSet<&str> = HashSet::new();

    for spec in &workflow.tasks {
        validate_spec(spec)?;

        if let Some(name) = spec.name.as_deref() {
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateName(name.to_string()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::TaskSpec;

    #[test]
    fn test_valid_spec_passes() {
        let spec = TaskSpec::new("fenicsx", "python3 solve.py").with_param("mesh_size", 16);
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn test_empty_tool_rejected() {
        let spec = TaskSpec::new("  ", "python3 solve.py").with_name("broken");
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::EmptyTool("broken".to_string()))
        );
    }

    #[test]
    fn test_empty_script_rejected() {
        let spec = TaskSpec::new("lammps", "   ");
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::EmptyScript("lammps".to_string()))
        );
    }

    #[test]
    fn test_unresolved_script_file_is_still_an_empty_script() {
        let mut spec = TaskSpec::new("lammps", "");
        spec.script_file = Some("scripts/run.sh".to_string());
        assert!(matches!(
            validate_spec(&spec),
            Err(ValidationError::EmptyScript(_))
        ));
    }

    #[test]
    fn test_empty_workflow_is_valid() {
        assert!(validate_workflow(&Workflow::new()).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let workflow = Workflow::sequential(vec![
            TaskSpec::new("fenicsx", "python3 a.py").with_name("mesh"),
            TaskSpec::new("openfoam", "blockMesh").with_name("mesh"),
        ]);

        assert_eq!(
            validate_workflow(&workflow),
            Err(ValidationError::DuplicateName("mesh".to_string()))
        );
    }

    #[test]
    fn test_unnamed_tasks_may_repeat_tools() {
        let workflow = Workflow::parallel(vec![
            TaskSpec::new("lammps", "lmp -in a.in"),
            TaskSpec::new("lammps", "lmp -in b.in"),
        ]);

        assert!(validate_workflow(&workflow).is_ok());
    }

    #[test]
    fn test_error_messages_name_the_task() {
        let spec = TaskSpec::new("", "echo hi").with_name("warmup");
        let err = validate_spec(&spec).unwrap_err();
        assert!(err.to_string().contains("warmup"));
    }
}
