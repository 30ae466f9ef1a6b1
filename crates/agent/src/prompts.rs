//! System prompt composition.
//!
//! The system prompt is assembled from templated sections in a fixed order.
//! A compact variant swaps the long rule sections for condensed ones when
//! the raw history is already large; a final hard cap bounds the prompt
//! regardless of what the sections produced.

use crate::analyzer::TaskType;
use crate::router::ModelTier;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Section templates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const BASE_IDENTITY: &str = "\
You are Sovereign, an autonomous coding agent running against a local model.
You work directly on the user's codebase through tools. You decide which
tools to call and in what order; nobody reviews intermediate steps.";

const TOOL_CALL_FORMAT: &str = "\
## Tool call format
Invoke tools with this exact tag syntax, one block per call:

<tool name=\"TOOL_NAME\">
<param name=\"PARAM_NAME\">VALUE</param>
</tool>

Multiple tool blocks per response are allowed. Parameter values may span
lines. Results arrive in the next message as <tool_result> blocks.";

const AUTONOMY_RULES: &str = "\
## Autonomy
- Act without asking for permission; the user sees only your final answer.
- When a step fails, explain what failed and what you did instead.
- Finish the task before responding without tool calls.";

const CRITICAL_THINKING_RULES: &str = "\
## Critical thinking
- Read before you write: inspect existing code before editing it.
- Prefer evidence from tool output over assumptions.
- State uncertainty instead of inventing file contents.";

const EFFICIENCY_RULES: &str = "\
## Efficiency
- Batch independent reads into a single response; they run in parallel.
- Do not re-read files you already read this turn; results are cached.
- Keep answers focused on what the user asked.";

const ANTI_LOOP_RULES: &str = "\
## Avoiding loops
- Never repeat an identical tool call you already made this turn.
- If a search finds nothing twice, change strategy: list directories or
  read likely files directly.
- Three similar failures mean the approach is wrong; pick another.";

const ERROR_LEARNING_RULES: &str = "\
## Learning from errors
- Failed tool results include recovery options; follow one of them.
- Do not retry a failed call unchanged.";

const RESPONSE_FORMAT_RULES: &str = "\
## Response format
- Plain prose with code blocks where useful.
- When the task is complete, summarize what changed and why.";

const COMPACT_RULES: &str = "\
## Working rules
Act autonomously; never ask permission. Use the tool tag syntax exactly.
Batch independent reads. Never repeat an identical call; change strategy
after repeated failures. Failed results carry recovery options - follow
them. Finish with a plain-prose summary of what changed.";

const CLOSING: &str = "Begin working on the user's request now.";

fn model_hint(tier: ModelTier) -> &'static str {
    match tier {
        ModelTier::Small => {
            "Model note: you are a small model. Keep reasoning short, prefer\n\
             single-file changes, and avoid speculative exploration."
        }
        ModelTier::Medium => {
            "Model note: balance exploration against progress; most tasks need\n\
             only a handful of tool calls."
        }
        ModelTier::Large => {
            "Model note: you have capacity for multi-file work. Plan briefly\n\
             before editing and keep the whole change consistent."
        }
    }
}

fn task_guidance(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Implement => {
            "## Task: implement\nWrite complete, working code. Create every file\n\
             the feature needs and wire it into the existing structure."
        }
        TaskType::Debug => {
            "## Task: debug\nReproduce first: read the failing code and trace the\n\
             actual values. Fix the cause, not the symptom."
        }
        TaskType::Refactor => {
            "## Task: refactor\nPreserve behavior. Make the structural change, then\n\
             update every caller and test you touched."
        }
        TaskType::Explain => {
            "## Task: explain\nRead the relevant code, then explain clearly with\n\
             short references to the actual lines."
        }
        TaskType::Review => {
            "## Task: review\nLook for correctness issues first, then clarity.\n\
             Cite file and line for each finding."
        }
        TaskType::Test => {
            "## Task: test\nCover the behavior that matters: boundaries, errors,\n\
             and the documented contract. Match the existing test style."
        }
        TaskType::Document => {
            "## Task: document\nDescribe what the code does and why it exists,\n\
             not how each line works."
        }
        TaskType::Explore => {
            "## Task: explore\nMap the territory with listings and searches, then\n\
             synthesize findings. Do not keep searching past the point of\n\
             diminishing returns."
        }
        TaskType::Ultrathink => {
            "## Task: deep implementation\nThis is a hard, multi-part task. Work\n\
             through it completely: plan the structure, create every component,\n\
             and verify the pieces fit together before finishing."
        }
        TaskType::General => "## Task\nHandle the request directly and completely.",
    }
}

/// Optional language/framework specialization keyed off the request text.
fn specialization(request: &str) -> Option<&'static str> {
    let lower = request.to_lowercase();
    if lower.contains("rust") || lower.contains(".rs") || lower.contains("cargo") {
        Some(
            "## Specialization: Rust\nUse Result and the ? operator for errors;\n\
             follow existing module layout; run nothing - write code that compiles.",
        )
    } else if lower.contains("python") || lower.contains(".py") {
        Some(
            "## Specialization: Python\nMatch the project's formatting and type\n\
             hints; prefer the standard library unless the project already\n\
             depends on something better.",
        )
    } else if lower.contains("typescript") || lower.contains("javascript") || lower.contains(".ts")
    {
        Some(
            "## Specialization: TypeScript/JavaScript\nKeep types strict and\n\
             follow the project's module system and lint rules.",
        )
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the prompt builder needs for one turn.
pub struct PromptContext<'a> {
    pub task: &'a str,
    pub task_type: TaskType,
    pub model_tier: ModelTier,
    pub tools_catalog: &'a str,
    pub retrieved_context: &'a str,
    pub conversation_summary: &'a str,
    pub recent_errors: &'a str,
    pub performance_hint: &'a str,
}

/// Hard cap applied after assembly.
pub const SYSTEM_PROMPT_MAX_CHARS: usize = 40_000;
/// Retrieved-context sections are clipped to this before assembly.
const RAG_SECTION_MAX_CHARS: usize = 3000;
/// Summaries are clipped to this before assembly.
const SUMMARY_MAX_CHARS: usize = 1500;

/// Build the system prompt. `compact` swaps the rule sections for the
/// condensed variant (used when raw history is already large).
pub fn build_system_prompt(ctx: &PromptContext<'_>, compact: bool) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(BASE_IDENTITY.to_string());
    sections.push(model_hint(ctx.model_tier).to_string());

    if let Some(spec) = specialization(ctx.task) {
        sections.push(spec.to_string());
    }

    if !ctx.retrieved_context.is_empty() {
        let mut rag = ctx.retrieved_context.to_string();
        if rag.len() > RAG_SECTION_MAX_CHARS {
            rag = clip(&rag, RAG_SECTION_MAX_CHARS);
            rag.push_str("\n[...retrieved context truncated...]");
        }
        sections.push(format!("## Retrieved context\n{rag}"));
    }

    if !ctx.conversation_summary.is_empty() {
        let summary = clip(ctx.conversation_summary, SUMMARY_MAX_CHARS);
        sections.push(format!("## Conversation summary\n{summary}"));
    }

    sections.push(task_guidance(ctx.task_type).to_string());

    if !ctx.tools_catalog.is_empty() {
        sections.push(format!("## Available tools\n{}", ctx.tools_catalog));
    }

    sections.push(TOOL_CALL_FORMAT.to_string());

    if compact {
        sections.push(COMPACT_RULES.to_string());
    } else {
        sections.push(AUTONOMY_RULES.to_string());
        sections.push(CRITICAL_THINKING_RULES.to_string());
        sections.push(EFFICIENCY_RULES.to_string());
        sections.push(ANTI_LOOP_RULES.to_string());
        sections.push(ERROR_LEARNING_RULES.to_string());
        sections.push(RESPONSE_FORMAT_RULES.to_string());
    }

    if !ctx.recent_errors.is_empty() {
        sections.push(format!("## Recent errors\n{}", ctx.recent_errors));
    }

    if !ctx.performance_hint.is_empty() {
        sections.push(ctx.performance_hint.to_string());
    }

    sections.push(CLOSING.to_string());

    let mut prompt = sections.join("\n\n");

    if prompt.len() > SYSTEM_PROMPT_MAX_CHARS {
        tracing::warn!(
            len = prompt.len(),
            cap = SYSTEM_PROMPT_MAX_CHARS,
            "system prompt over hard cap, truncating"
        );
        prompt = clip(&prompt, SYSTEM_PROMPT_MAX_CHARS);
        prompt.push_str("\n\n[System prompt truncated due to size]");
    }

    prompt
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
