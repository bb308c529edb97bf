//! Step selection for multi-step retries

use crate::error::EngineError;
use chatgen_storage::PlanStep;

const ACTION_PREVIEW_CHARS: usize = 50;

/// A plan step renumbered for execution. `step_number` is 1-based and contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub step_number: usize,
    pub tool: String,
    pub action: String,
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl Step {
    /// Tool name, or the start of the instruction for steps authored without one.
    pub fn label(&self) -> String {
        step_label(&self.tool, &self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSelection {
    All,
    Numbers(Vec<usize>),
    Tools(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPlan {
    pub steps: Vec<Step>,
    pub selection: StepSelection,
    /// 1-based positions of the kept steps in the stored plan.
    pub original_numbers: Vec<usize>,
}

fn step_label(tool: &str, action: &str) -> String {
    let tool = tool.trim();
    if !tool.is_empty() {
        return tool.to_string();
    }
    let action = action.trim();
    if action.chars().count() <= ACTION_PREVIEW_CHARS {
        action.to_string()
    } else {
        let preview: String = action.chars().take(ACTION_PREVIEW_CHARS).collect();
        format!("{}...", preview)
    }
}

/// `"<n>. <label>"` for every step of the stored plan.
pub fn describe_steps(plan: &[PlanStep]) -> Vec<String> {
    plan.iter()
        .enumerate()
        .map(|(idx, step)| format!("{}. {}", idx + 1, step_label(&step.tool, &step.action)))
        .collect()
}

/// Explicit step numbers win over tool fragments; with neither, the whole plan is kept.
/// Tool fragments match when either string contains the other (case-sensitive).
pub fn filter_steps(
    plan: &[PlanStep],
    step_numbers: &[usize],
    step_tools: &[String],
) -> Result<FilteredPlan, EngineError> {
    let fragments: Vec<&str> = step_tools
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    let selection = if !step_numbers.is_empty() {
        let mut numbers = step_numbers.to_vec();
        numbers.sort_unstable();
        numbers.dedup();
        StepSelection::Numbers(numbers)
    } else if !fragments.is_empty() {
        StepSelection::Tools(fragments.iter().map(|f| f.to_string()).collect())
    } else {
        StepSelection::All
    };

    let keep = |idx: usize, step: &PlanStep| -> bool {
        match &selection {
            StepSelection::All => true,
            StepSelection::Numbers(numbers) => numbers.contains(&(idx + 1)),
            StepSelection::Tools(_) => fragments
                .iter()
                .any(|f| step.tool.contains(f) || f.contains(step.tool.as_str())),
        }
    };

    let mut steps = Vec::new();
    let mut original_numbers = Vec::new();
    for (idx, step) in plan.iter().enumerate() {
        if step.tool.is_empty() && matches!(selection, StepSelection::Tools(_)) {
            continue;
        }
        if keep(idx, step) {
            original_numbers.push(idx + 1);
            steps.push(Step {
                step_number: steps.len() + 1,
                tool: step.tool.clone(),
                action: step.action.clone(),
                parameters: step.parameters.clone(),
            });
        }
    }

    if steps.is_empty() {
        return Err(EngineError::NoMatchingSteps {
            available: describe_steps(plan),
        });
    }

    Ok(FilteredPlan {
        steps,
        selection,
        original_numbers,
    })
}
