//! Instruction builder for agent attempts.
//!
//! Training and replay render the same template: the task followed by every
//! operator hint in the order it was given.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

const INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/instructions.md");

fn engine() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("instructions", INSTRUCTIONS_TEMPLATE)
        .context("load instructions template")?;
    Ok(env)
}

/// Render the instruction string handed to the agent.
///
/// Hints are emitted verbatim; blank hints are skipped.
pub fn render_instructions(task: &str, hints: &[&str]) -> Result<String> {
    let env = engine()?;
    let hints: Vec<&str> = hints
        .iter()
        .map(|hint| hint.trim())
        .filter(|hint| !hint.is_empty())
        .collect();
    let template = env.get_template("instructions")?;
    let rendered = template
        .render(context! {
            task => task.trim(),
            hints => hints,
        })
        .context("render instructions")?;
    debug!(hints = hints.len(), bytes = rendered.len(), "rendered instructions");
    Ok(rendered.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_without_hints_is_passed_through() {
        let rendered = render_instructions("  Open the customer list \n", &[]).expect("render");
        assert_eq!(rendered, "Open the customer list");
    }

    #[test]
    fn hints_follow_the_task_in_order() {
        let rendered = render_instructions(
            "Open the customer list",
            &["click the Customers link", "  ", "sort by name"],
        )
        .expect("render");
        assert_eq!(
            rendered,
            "Open the customer list\n\nIMPORTANT GUIDANCE (learned from training):\n\
             - click the Customers link\n- sort by name"
        );
    }

    #[test]
    fn hint_text_is_not_escaped() {
        let rendered = render_instructions("task", &["type <b>&</b> into 'q'"]).expect("render");
        assert!(rendered.ends_with("- type <b>&</b> into 'q'"));
    }
}
