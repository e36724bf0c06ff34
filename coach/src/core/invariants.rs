//! Semantic invariants of a learned workflow not expressible via JSON Schema.

use crate::core::types::{LearnedWorkflow, StepAction};

/// Check semantic invariants:
/// - at least one step
/// - `step_number` is 1-based, contiguous and matches position
/// - `user_hint` is present (non-empty) exactly on `guidance` steps
/// - `completed` may only be the final step
/// - `last_trained` is not before `created_at`
pub fn validate_workflow(workflow: &LearnedWorkflow) -> Vec<String> {
    let mut errors = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push("name must not be empty".to_string());
    }
    if workflow.steps.is_empty() {
        errors.push("workflow must have at least one step".to_string());
    }
    if workflow.last_trained < workflow.created_at {
        errors.push("last_trained must not precede created_at".to_string());
    }

    let last = workflow.steps.len();
    for (pos, step) in workflow.steps.iter().enumerate() {
        let expected = pos as u32 + 1;
        if step.step_number != expected {
            errors.push(format!(
                "step {}: step_number must be {}",
                step.step_number, expected
            ));
        }
        match (step.action, step.user_hint.as_deref()) {
            (StepAction::Guidance, None) => {
                errors.push(format!("step {expected}: guidance requires user_hint"));
            }
            (StepAction::Guidance, Some(hint)) if hint.trim().is_empty() => {
                errors.push(format!("step {expected}: user_hint must not be empty"));
            }
            (action, Some(_)) if action != StepAction::Guidance => {
                errors.push(format!(
                    "step {expected}: user_hint only allowed on guidance steps"
                ));
            }
            _ => {}
        }
        if step.action == StepAction::Completed && expected as usize != last {
            errors.push(format!("step {expected}: completed must be the final step"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::WorkflowStep;
    use crate::test_support::sample_workflow;

    #[test]
    fn sample_workflow_is_valid() {
        assert!(validate_workflow(&sample_workflow("demo")).is_empty());
    }

    #[test]
    fn reports_every_violation() {
        let mut workflow = sample_workflow("demo");
        workflow.steps[0].step_number = 5;
        workflow.steps[0].user_hint = None;
        workflow.steps.insert(
            1,
            WorkflowStep {
                step_number: 2,
                action: StepAction::Completed,
                description: "early".to_string(),
                user_hint: Some("stray".to_string()),
                selector: None,
            },
        );

        let errors = validate_workflow(&workflow);
        assert!(errors.iter().any(|e| e.contains("step_number must be 1")));
        assert!(errors.iter().any(|e| e.contains("guidance requires user_hint")));
        assert!(errors.iter().any(|e| e.contains("only allowed on guidance")));
        assert!(errors.iter().any(|e| e.contains("completed must be the final")));
    }

    #[test]
    fn zero_steps_is_invalid() {
        let mut workflow = sample_workflow("demo");
        workflow.steps.clear();
        let errors = validate_workflow(&workflow);
        assert_eq!(errors, vec!["workflow must have at least one step".to_string()]);
    }
}
