//! Conversation builders for each phase of the refinement loop.
//!
//! Every call the loop makes to the language model starts from one of four
//! system prompts. [`PromptKind::of`] maps a conversation back to its kind,
//! which test doubles use to tell phases apart.

use crate::llm::ChatMessage;

/// System prompt for the evaluation phase.
pub const EVALUATOR_SYSTEM_PROMPT: &str = "You are the Evaluator of AutoSCAD. Your job is to evaluate the provided \
OpenSCAD code and its rendered model against the specification. Evaluate if the specification is fully satisfied. \
Answer YES or NO on the first line, then give a one-line explanation on the second line.";

/// System prompt for the planning phase.
pub const PLANNER_SYSTEM_PROMPT: &str = "You are an expert SCAD engineer. You turn evaluation feedback into a \
concrete, minimal plan for modifying OpenSCAD code.";

/// System prompt for the code generation phase.
pub const GENERATOR_SYSTEM_PROMPT: &str = "You are a SCAD code generator. Follow these rules:\n\
1. ONLY output valid SCAD syntax\n\
2. NEVER add markdown formatting\n\
3. PRESERVE existing functionality\n\
4. IMPLEMENT changes from the plan\n\
5. NEVER create recursive modules\n\
6. ALWAYS use correct function arguments";

/// System prompt for the render-repair sub-loop.
pub const REPAIR_SYSTEM_PROMPT: &str = "You are a SCAD code fixer. The given OpenSCAD code fails to render. \
Fix ALL reported errors while keeping the intended geometry. Output ONLY the complete corrected SCAD code, \
without markdown formatting or commentary.";

const EMPTY_SOURCE_NOTE: &str = "(empty - write the model from scratch)";

/// The phase a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Evaluate,
    Plan,
    Codegen,
    Repair,
}

impl PromptKind {
    /// The system prompt used for this kind.
    #[must_use]
    pub fn system_prompt(&self) -> &'static str {
        match self {
            PromptKind::Evaluate => EVALUATOR_SYSTEM_PROMPT,
            PromptKind::Plan => PLANNER_SYSTEM_PROMPT,
            PromptKind::Codegen => GENERATOR_SYSTEM_PROMPT,
            PromptKind::Repair => REPAIR_SYSTEM_PROMPT,
        }
    }

    /// Identify a conversation by its leading system message.
    #[must_use]
    pub fn of(messages: &[ChatMessage]) -> Option<PromptKind> {
        let system = messages.first()?;
        [
            PromptKind::Evaluate,
            PromptKind::Plan,
            PromptKind::Codegen,
            PromptKind::Repair,
        ]
        .into_iter()
        .find(|kind| system.content == kind.system_prompt())
    }
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PromptKind::Evaluate => write!(f, "evaluate"),
            PromptKind::Plan => write!(f, "plan"),
            PromptKind::Codegen => write!(f, "codegen"),
            PromptKind::Repair => write!(f, "repair"),
        }
    }
}

fn source_block(source: &str) -> &str {
    if source.trim().is_empty() {
        EMPTY_SOURCE_NOTE
    } else {
        source
    }
}

fn image_note(view_names: &[String]) -> String {
    if view_names.is_empty() {
        "No rendered images are attached; judge from the code alone.".to_string()
    } else {
        format!(
            "Rendered model images are attached, one per camera view in this order: {}.",
            view_names.join(", ")
        )
    }
}

/// Conversation asking whether the rendered model satisfies the specification.
///
/// `view_names` lists the attached images; pass an empty slice when the
/// client cannot receive images.
#[must_use]
pub fn evaluation(specification: &str, source: &str, view_names: &[String]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EVALUATOR_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Specification:\n{}\n\nCurrent SCAD code:\n{}\n\n{}\n\n\
             Does the rendered model fulfill the specification? \
             First line: YES or NO. Second line: a short explanation.",
            specification,
            source_block(source),
            image_note(view_names)
        )),
    ]
}

/// Conversation asking for a step-by-step modification plan.
#[must_use]
pub fn planning(
    specification: &str,
    source: &str,
    explanation: &str,
    view_names: &[String],
) -> Vec<ChatMessage> {
    let feedback = if explanation.trim().is_empty() {
        "(the evaluator gave no explanation)"
    } else {
        explanation
    };
    vec![
        ChatMessage::system(PLANNER_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Specification:\n{}\n\nCurrent SCAD code:\n{}\n\nEvaluator feedback:\n{}\n\n{}\n\n\
             Make a concrete plan to modify the SCAD code so it fulfills the specification. \
             Provide the plan as a JSON array of steps, each with 'action' and 'description' fields.",
            specification,
            source_block(source),
            feedback,
            image_note(view_names)
        )),
    ]
}

/// Conversation asking for full replacement source implementing a plan.
#[must_use]
pub fn codegen(specification: &str, source: &str, plan: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(GENERATOR_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Specification:\n{}\n\nCurrent SCAD code:\n{}\n\nPlan:\n{}\n\n\
             Generate ONLY the complete, valid SCAD code without any additional text:",
            specification,
            source_block(source),
            plan
        )),
    ]
}

/// Conversation asking to fix source that failed to render.
///
/// `diagnostic` must be the renderer output for exactly this `source`.
#[must_use]
pub fn repair(specification: &str, source: &str, diagnostic: &str, attempt: u32) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REPAIR_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Specification:\n{}\n\nSCAD code (fix attempt {}):\n{}\n\nRenderer errors:\n{}\n\n\
             Fix this code so it renders. Output ONLY the corrected SCAD code:",
            specification,
            attempt,
            source_block(source),
            diagnostic.trim()
        )),
    ]
}
