//! Request classification heuristics.
//!
//! Two pure functions over the user request: [`analyze_complexity`] decides
//! how much planning a turn needs, [`detect_task_type`] shapes the prompt
//! and model choice. Both are advisory; they never gate execution.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Complexity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Single file, single operation.
    Simple,
    /// Multiple related operations.
    Moderate,
    /// Multi-component work that benefits from a linear plan.
    Complex,
    /// Whole-project creation or transformation; gets a phased plan.
    Project,
}

/// Keywords indicating whole-project creation or transformation.
const PROJECT_KEYWORDS: &[&str] = &[
    "create a project",
    "build a",
    "develop a",
    "implement a full",
    "turn it into",
    "transform into",
    "convert to",
    "loader",
    "overlay system",
    "complete application",
    "full system",
    "entire project",
];

/// Multi-phase markers.
const PHASE_KEYWORDS: &[&str] = &[
    "first",
    "then",
    "after that",
    "finally",
    "also",
    "multiple features",
    "several components",
    "phase 1",
    "phase 2",
    "step 1",
    "step 2",
];

/// Generic complexity verbs; co-occurrence counts toward MODERATE/COMPLEX.
const COMPLEXITY_INDICATORS: &[&str] = &[
    " and then ",
    " after ",
    " before ",
    "implement",
    "test",
    "deploy",
    "document",
    "multiple",
    "several",
    "various",
    "refactor",
    "migrate",
    "upgrade",
    "enhance",
    "improve",
    "optimize",
    "add features",
    "new functionality",
];

pub fn analyze_complexity(request: &str) -> Complexity {
    let lower = request.to_lowercase();

    if PROJECT_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Complexity::Project;
    }

    let indicator_count = COMPLEXITY_INDICATORS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    let phase_count = PHASE_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();

    if phase_count >= 2 || indicator_count >= 4 {
        Complexity::Complex
    } else if indicator_count >= 2 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Implement,
    Debug,
    Refactor,
    Explain,
    Review,
    Test,
    Document,
    Explore,
    /// Deep-reasoning mode for the hardest implementation work.
    Ultrathink,
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Implement => "implement",
            TaskType::Debug => "debug",
            TaskType::Refactor => "refactor",
            TaskType::Explain => "explain",
            TaskType::Review => "review",
            TaskType::Test => "test",
            TaskType::Document => "document",
            TaskType::Explore => "explore",
            TaskType::Ultrathink => "ultrathink",
            TaskType::General => "general",
        }
    }

    /// Implementation-shaped tasks tolerate more repeated calls before the
    /// loop detector fires (rewrites legitimately retouch the same file).
    pub fn is_implementation(&self) -> bool {
        matches!(self, TaskType::Implement | TaskType::Refactor)
    }
}

/// Vocabulary that switches a turn into deep-reasoning mode.
const ULTRATHINK_TRIGGERS: &[&str] = &[
    "ultrathink",
    "deep think",
    "think hard",
    "complex",
    "advanced",
    "full system",
    "complete implementation",
];

/// First-match-wins over an ordered table of verb sets.
pub fn detect_task_type(request: &str) -> TaskType {
    let lower = request.to_lowercase();

    const TABLE: &[(TaskType, &[&str])] = &[
        (TaskType::Implement, &["implement", "create", "build", "add", "write new"]),
        (TaskType::Debug, &["debug", "fix", "bug", "error", "broken", "not working"]),
        (TaskType::Refactor, &["refactor", "improve", "clean up", "optimize", "restructure"]),
        (TaskType::Explain, &["explain", "what does", "how does", "why does", "understand"]),
        (TaskType::Review, &["review", "check", "audit", "analyze quality"]),
        (TaskType::Test, &["test", "write tests", "add tests", "coverage"]),
        (TaskType::Document, &["document", "readme", "docstring", "comments"]),
        (TaskType::Explore, &["explore", "find", "search", "where is", "show me"]),
    ];

    for (task_type, keywords) in TABLE {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *task_type;
        }
    }
    TaskType::General
}

/// Whether the request carries explicit deep-reasoning triggers.
pub fn has_ultrathink_trigger(request: &str) -> bool {
    let lower = request.to_lowercase();
    ULTRATHINK_TRIGGERS.iter().any(|t| lower.contains(t))
}
