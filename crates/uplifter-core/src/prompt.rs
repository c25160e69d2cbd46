//! Prompt rendering.
//!
//! A prompt states, in order: the target language and version, the
//! conservative-modernization rules, the static-analysis findings, the RAG
//! guidance block (or the [`NO_GUIDANCE`](crate::guidance::NO_GUIDANCE)
//! notice), the required reply format, and the chunk's code. The reply
//! format asks for exactly two tagged regions, `<change_summary>` and
//! `<updated_code>`, which is what [`extract`](crate::extract) relies on.
//!
//! The rendered prompt must fit `max_total_tokens - response_reserve_tokens`.
//! When it does not, guidance evidences are dropped first, then the findings
//! block is shortened. The code is never altered.

use serde::Serialize;

use crate::chunk::{Chunk, ChunkBudget};
use crate::guidance::{truncate_chars, GuidanceBundle, RENDERED_EVIDENCES};
use crate::models::ModernizationJob;
use crate::tokens::TokenProfile;

/// Opening tag of the change summary region.
pub const SUMMARY_OPEN: &str = "<change_summary>";
/// Closing tag of the change summary region.
pub const SUMMARY_CLOSE: &str = "</change_summary>";
/// Opening tag of the code region.
pub const CODE_OPEN: &str = "<updated_code>";
/// Closing tag of the code region.
pub const CODE_CLOSE: &str = "</updated_code>";

/// Findings are never shortened below this many characters.
const MIN_FINDINGS_CHARS: usize = 200;

const FINDINGS_TRUNCATED: &str = "[further findings omitted]";

/// A fully rendered LLM input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptEnvelope {
    pub target_version: String,
    /// Findings as rendered (possibly shortened).
    pub findings: String,
    pub guidance_block: String,
    /// Code shown to the model (the chunk's prompt view).
    pub chunk_code: String,
    pub control_instructions: String,
    /// The complete prompt.
    pub text: String,
    pub estimated_tokens: usize,
    pub evidences_shown: usize,
    pub findings_truncated: bool,
    /// False only when even the fully trimmed prompt exceeds the budget.
    pub within_budget: bool,
}

/// Renders prompts under a token budget.
#[derive(Debug, Clone, Copy)]
pub struct PromptRenderer {
    budget: ChunkBudget,
    profile: TokenProfile,
}

impl PromptRenderer {
    pub fn new(budget: ChunkBudget) -> Self {
        Self {
            budget,
            profile: TokenProfile::code(),
        }
    }

    /// Render the prompt for `chunk` of a file split into `total_chunks`.
    pub fn render(
        &self,
        job: &ModernizationJob,
        guidance: &GuidanceBundle,
        chunk: &Chunk,
        total_chunks: usize,
    ) -> PromptEnvelope {
        let limit = self.budget.prompt_budget();
        let code = chunk.prompt_code();
        let control = control_instructions(job, chunk, total_chunks);
        let full_findings = findings_block(job);

        let mut shown = if guidance.found { RENDERED_EVIDENCES } else { 0 };
        let mut findings_limit = full_findings.chars().count();

        loop {
            let truncated = findings_limit < full_findings.chars().count();
            let findings = if truncated {
                format!("{}\n{}", truncate_chars(&full_findings, findings_limit), FINDINGS_TRUNCATED)
            } else {
                full_findings.clone()
            };
            let guidance_block = guidance.render_with(shown);
            let text = assemble_prompt(job, &control, &findings, &guidance_block, &code);
            let estimated_tokens = self.profile.estimate(&text);

            let fits = estimated_tokens <= limit;
            let can_drop_evidence = shown > 0;
            let can_shorten_findings = findings_limit > MIN_FINDINGS_CHARS;
            if fits || (!can_drop_evidence && !can_shorten_findings) {
                return PromptEnvelope {
                    target_version: job.target_version.clone(),
                    findings,
                    guidance_block,
                    chunk_code: code,
                    control_instructions: control,
                    text,
                    estimated_tokens,
                    evidences_shown: shown,
                    findings_truncated: truncated,
                    within_budget: fits,
                };
            }
            if can_drop_evidence {
                shown -= 1;
            } else {
                findings_limit = (findings_limit / 2).max(MIN_FINDINGS_CHARS);
            }
        }
    }
}

fn findings_block(job: &ModernizationJob) -> String {
    if job.findings_available() {
        job.findings.trim().to_string()
    } else {
        format!(
            "No static analysis findings are available. Apply only changes required for {} {}.",
            job.language.display_name(),
            job.target_version
        )
    }
}

fn control_instructions(job: &ModernizationJob, chunk: &Chunk, total_chunks: usize) -> String {
    let lang = job.language.display_name();
    let version = &job.target_version;
    let mut rules = vec![
        "Keep behavior identical. Do NOT fix bugs, errors or questionable logic, even when the code looks wrong.".to_string(),
        format!("Only update syntax, deprecated APIs and idioms for {lang} {version} compatibility."),
        "Do NOT add dependencies, imports, error handling or optimizations.".to_string(),
        "Keep every function, class, comment, docstring, variable name and signature.".to_string(),
        "Return the COMPLETE code. Never abbreviate with placeholders such as \"rest unchanged\".".to_string(),
    ];
    if total_chunks > 1 {
        rules.push(format!(
            "This is part {} of {} of a larger file. Return exactly this part with the same first and last lines.",
            chunk.ordinal + 1,
            total_chunks
        ));
    }
    if !chunk.complete_structures {
        rules.push("This part may begin or end inside a definition. Keep its indentation as given.".to_string());
    }
    rules
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n")
}

fn assemble_prompt(job: &ModernizationJob, control: &str, findings: &str, guidance: &str, code: &str) -> String {
    let lang = job.language.display_name();
    let version = &job.target_version;
    let fence = job.language.fence_tag();
    let code = code.strip_suffix('\n').unwrap_or(code);
    format!(
        "You are a {lang} expert performing CONSERVATIVE modernization of existing code to {lang} {version}.\n\
         \n\
         RULES:\n\
         {control}\n\
         \n\
         Static analysis found these modernization opportunities:\n\
         <analysis_findings>\n\
         {findings}\n\
         </analysis_findings>\n\
         \n\
         Organization guidance:\n\
         {guidance}\n\
         \n\
         Respond with exactly these two regions and nothing else:\n\
         \n\
         {SUMMARY_OPEN}\n\
         [Brief list of each modernization change applied]\n\
         {SUMMARY_CLOSE}\n\
         \n\
         {CODE_OPEN}\n\
         ```{fence}\n\
         [The updated code]\n\
         ```\n\
         {CODE_CLOSE}\n\
         \n\
         Original {lang} code:\n\
         ```{fence}\n\
         {code}\n\
         ```\n"
    )
}
