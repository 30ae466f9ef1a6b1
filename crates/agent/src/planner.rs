//! Task decomposition for complex and project-level requests.
//!
//! COMPLEX requests become a linear chain split on "and then"-style
//! connectives; PROJECT requests get a fixed five-phase template whose
//! middle phases are included based on component keywords. Dependencies
//! form a DAG (here always a chain) and a task becomes runnable only once
//! everything it depends on is completed.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub dependencies: Vec<String>,
}

impl Task {
    fn new(id: impl Into<String>, description: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies,
        }
    }

    pub fn can_start(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|d| completed.contains(d))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub name: String,
    pub tasks: Vec<Task>,
}

impl TaskPlan {
    /// All pending tasks whose dependencies are completed.
    pub fn get_next_tasks(&self) -> Vec<&Task> {
        let completed: HashSet<String> = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect();

        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.can_start(&completed))
            .collect()
    }

    pub fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn mark_completed(&mut self, id: &str) {
        if let Some(task) = self.get_task_mut(id) {
            task.status = TaskStatus::Completed;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Completed)
    }

    /// `(completed, total)`.
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        (completed, self.tasks.len())
    }

    /// Render the "Current Phase" subsection for the system prompt: only
    /// the ready tasks of the current phase, so the model works one phase
    /// at a time.
    pub fn current_phase_prompt(&self) -> String {
        let next = self.get_next_tasks();
        if next.is_empty() {
            let (completed, total) = self.progress();
            if completed == total {
                return "All phases complete. Summarize the work done.".to_string();
            }
            return "Waiting for blocked tasks to unblock.".to_string();
        }

        let phase_re = Regex::new(r"Phase (\d+):").expect("phase pattern is valid");
        let phase = phase_re
            .captures(&next[0].description)
            .map(|c| c[1].to_string());

        let phase_tasks: Vec<&&Task> = match &phase {
            Some(n) => next
                .iter()
                .filter(|t| t.description.contains(&format!("Phase {n}:")))
                .collect(),
            None => next.iter().collect(),
        };

        let label = phase.as_deref().unwrap_or("Current");
        let mut lines = vec![
            format!("## Current Phase: {label}"),
            format!("Tasks to complete ({}):", phase_tasks.len()),
        ];
        for task in &phase_tasks {
            let desc = match &phase {
                Some(n) => task
                    .description
                    .replace(&format!("Phase {n}: "), ""),
                None => task.description.clone(),
            };
            lines.push(format!("- {desc}"));
        }
        lines.push(String::new());
        lines.push("Focus ONLY on these tasks. Complete them before moving to the next phase.".into());
        lines.push("Use tools to implement each task, then report completion.".into());
        lines.join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decomposition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn plan_name(request: &str, prefix: &str) -> String {
    let mut name = request.chars().take(40).collect::<String>();
    if request.chars().count() > 40 {
        name.push_str("...");
    }
    format!("{prefix}{name}")
}

/// Chain the request's clauses with sequential dependencies.
pub fn decompose_linear(request: &str) -> TaskPlan {
    let parts: Vec<&str> = if request.contains(" and then ") {
        request.split(" and then ").collect()
    } else if request.contains(", then ") {
        request.split(", then ").collect()
    } else if request.contains(" then ") {
        request.split(" then ").collect()
    } else if request.contains(" and ") {
        request.split(" and ").collect()
    } else {
        vec![request]
    };

    let tasks = parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let deps = if i > 0 {
                vec![format!("task_{i}")]
            } else {
                Vec::new()
            };
            Task::new(format!("task_{}", i + 1), part.trim(), deps)
        })
        .collect();

    TaskPlan {
        name: plan_name(request, ""),
        tasks,
    }
}

/// Materialize the five-phase project template. Phase 1 (analysis) and
/// phase 5 (integration) always exist; phases 2–4 include tasks only for
/// the components the request mentions.
pub fn create_project_plan(request: &str) -> TaskPlan {
    let lower = request.to_lowercase();
    let has_loader = ["loader", "launcher", "bootstrap"].iter().any(|k| lower.contains(k));
    let has_injection = ["inject", "hook", "plugin"].iter().any(|k| lower.contains(k));
    let has_overlay = ["overlay", "menu", "gui", "ui"].iter().any(|k| lower.contains(k));
    let has_config = ["config", "settings", "options"].iter().any(|k| lower.contains(k));
    let has_cleaning = ["clean", "prune", "sanitize"].iter().any(|k| lower.contains(k));

    let mut tasks: Vec<Task> = Vec::new();
    let mut id = 0usize;
    let mut push = |tasks: &mut Vec<Task>, id: &mut usize, description: &str| {
        *id += 1;
        let deps = if *id > 1 {
            vec![format!("task_{}", *id - 1)]
        } else {
            Vec::new()
        };
        tasks.push(Task::new(format!("task_{id}"), description, deps));
    };

    // Phase 1: Analysis and planning.
    push(&mut tasks, &mut id, "Phase 1: Analyze existing codebase structure and identify components");
    push(&mut tasks, &mut id, "Phase 1: Create project structure and directory layout");

    // Phase 2: Core infrastructure.
    if has_loader {
        push(&mut tasks, &mut id, "Phase 2: Implement the loader/startup core with process handling");
    }
    if has_injection {
        push(&mut tasks, &mut id, "Phase 2: Implement the plugin/hook integration mechanism");
    }

    // Phase 3: Features.
    if has_overlay {
        push(&mut tasks, &mut id, "Phase 3: Create the overlay window and rendering layer");
        push(&mut tasks, &mut id, "Phase 3: Implement the menu and configuration UI");
    }
    if has_config {
        push(&mut tasks, &mut id, "Phase 3: Implement the configuration system (save/load settings)");
    }

    // Phase 4: Cleanup and hardening.
    if has_cleaning {
        push(&mut tasks, &mut id, "Phase 4: Implement cleanup of temporary artifacts and logs");
        push(&mut tasks, &mut id, "Phase 4: Harden inputs and remove dead code paths");
    }

    // Phase 5: Integration and testing.
    push(&mut tasks, &mut id, "Phase 5: Integrate all components and test end-to-end");
    push(&mut tasks, &mut id, "Phase 5: Create the build system and documentation");

    TaskPlan {
        name: plan_name(request, "Project: "),
        tasks,
    }
}
