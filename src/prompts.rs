//! Prompts for category-aware insight extraction.
//!
//! Every prompt lives here so the schema the model is asked for and the
//! schema [`crate::pipeline::extract`] parses can be checked side by side.
//! Callers can replace the system prompt via
//! [`crate::config::PipelineConfig::system_prompt`]; the user prompt always
//! comes from [`user_prompt`].

/// Default system prompt for statement extraction.
///
/// Used when `PipelineConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a financial analyst reading an excerpt of a company's annual report.

Extract the statements that matter to an investor and sort them into exactly four categories:

1. positive  - achievements, growth, improved metrics, favourable outcomes
2. negative  - declines, losses, missed targets, unfavourable outcomes
3. guidance  - forward-looking statements, targets, plans, outlook
4. risk      - risks, uncertainties, exposures, contingencies

Rules:
- Each item must be a short, standalone statement that makes sense without the surrounding text
- Keep figures, units and periods exactly as written
- Only use information present in the excerpt; never invent statements
- A statement belongs to one category only
- Use an empty list when a category has nothing

Return STRICTLY valid JSON with this shape and nothing else:
{"positive": [], "negative": [], "guidance": [], "risk": []}

Do NOT wrap the JSON in ```json fences. Do NOT add explanations."#;

/// User turn carrying one chunk of the report.
pub fn user_prompt(chunk_text: &str) -> String {
    format!("Annual report excerpt:\n\n{chunk_text}")
}
