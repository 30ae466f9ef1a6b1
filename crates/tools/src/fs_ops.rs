//! Filesystem tools constrained to an allowlist of roots.
//!
//! Relative paths resolve against the agent's working directory; absolute
//! paths are accepted only inside an allowed root (working directory or the
//! system temp directory, where uploaded projects land). Paths containing
//! `..` or resolving outside every allowed root are rejected with a
//! "not allowed" error the recovery manager recognizes.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use sov_domain::message::{ToolParams, ToolResult};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{require_param, ParamSpec, ParamType, Tool};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolves and validates tool paths against an allowlist of roots.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    working_dir: PathBuf,
    allowed_roots: Vec<PathBuf>,
}

impl PathPolicy {
    /// Allow the working directory and the system temp directory (uploaded
    /// project archives are unpacked there).
    pub fn new(working_dir: &Path) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            allowed_roots: vec![working_dir.to_path_buf(), std::env::temp_dir()],
        }
    }

    pub fn with_root(mut self, root: &Path) -> Self {
        self.allowed_roots.push(root.to_path_buf());
        self
    }

    /// Validate and resolve a requested path.
    ///
    /// 1. Rejects raw `..` components before any resolution.
    /// 2. Joins relative paths onto the working directory.
    /// 3. Canonicalizes via the nearest existing ancestor (the target may
    ///    not exist yet for writes) and checks containment in an allowed
    ///    root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, String> {
        let requested_path = Path::new(requested);

        for component in requested_path.components() {
            if matches!(component, Component::ParentDir) {
                return Err("path must not contain '..' components".to_owned());
            }
        }

        let candidate = if requested_path.is_absolute() {
            requested_path.to_path_buf()
        } else {
            self.working_dir.join(requested_path)
        };

        let resolved = canonicalize_with_tail(&candidate)?;

        let allowed = self.allowed_roots.iter().any(|root| {
            root.canonicalize()
                .map(|root| resolved.starts_with(&root))
                .unwrap_or(false)
        });
        if !allowed {
            return Err(format!(
                "path '{requested}' is not allowed (outside permitted directories)"
            ));
        }

        Ok(resolved)
    }
}

/// Canonicalize a path that may not exist yet: canonicalize the nearest
/// existing ancestor and re-append the missing tail.
fn canonicalize_with_tail(candidate: &Path) -> Result<PathBuf, String> {
    if candidate.exists() {
        return candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()));
    }

    let mut existing = candidate;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match existing.parent() {
            Some(parent) => {
                if let Some(file_name) = existing.file_name() {
                    tail.push(file_name);
                }
                existing = parent;
            }
            None => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReadFileTool {
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("path", ParamType::String, "Path to the file to read"),
            ParamSpec::optional("offset", ParamType::Integer, "First line to return (0-based)"),
            ParamSpec::optional("limit", ParamType::Integer, "Maximum number of lines to return"),
        ];
        PARAMS
    }

    async fn execute(&self, params: &ToolParams) -> ToolResult {
        let requested = match require_param(params, "path") {
            Ok(p) => p,
            Err(failure) => return failure,
        };
        let path = match self.policy.resolve(requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::err(format!("failed to read '{}': {e}", path.display()))
            }
        };

        let offset: usize = params
            .get("offset")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let limit: Option<usize> = params.get("limit").and_then(|v| v.parse().ok());

        if offset == 0 && limit.is_none() {
            return ToolResult::ok(content);
        }

        let selected: Vec<&str> = content
            .lines()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        ToolResult::ok(selected.join("\n"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteFileTool {
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content"
    }

    fn parameters(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("path", ParamType::String, "Path of the file to create or overwrite"),
            ParamSpec::required("content", ParamType::String, "Complete file contents"),
        ];
        PARAMS
    }

    async fn execute(&self, params: &ToolParams) -> ToolResult {
        let requested = match require_param(params, "path") {
            Ok(p) => p,
            Err(failure) => return failure,
        };
        // Empty content is a legitimate write; only absence is an error.
        let content = match params.get("content") {
            Some(c) => c.as_str(),
            None => return ToolResult::err("missing required parameter: content"),
        };
        let path = match self.policy.resolve(requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                return ToolResult::err(format!("failed to create parent directory: {e}"));
            }
        }

        // Atomic write: temp sibling, flush, rename into place.
        let tmp_name = format!(
            ".{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        let tmp_path = path.with_file_name(tmp_name);

        let write_result: Result<(), String> = async {
            let mut file = fs::File::create(&tmp_path)
                .await
                .map_err(|e| format!("failed to create temp file: {e}"))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| format!("failed to write temp file: {e}"))?;
            file.flush()
                .await
                .map_err(|e| format!("failed to flush temp file: {e}"))?;
            fs::rename(&tmp_path, &path)
                .await
                .map_err(|e| format!("failed to rename temp file into place: {e}"))?;
            Ok(())
        }
        .await;

        match write_result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), bytes = content.len(), "wrote file");
                ToolResult::ok(format!(
                    "Wrote {} bytes to {}",
                    content.len(),
                    path.display()
                ))
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                ToolResult::err(e)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// str_replace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StrReplaceTool {
    policy: Arc<PathPolicy>,
}

impl StrReplaceTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Tool for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace an exact text fragment in an existing file"
    }

    fn parameters(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[
            ParamSpec::required("path", ParamType::String, "File to edit"),
            ParamSpec::required("old_str", ParamType::String, "Exact text to find"),
            ParamSpec::required("new_str", ParamType::String, "Replacement text"),
        ];
        PARAMS
    }

    async fn execute(&self, params: &ToolParams) -> ToolResult {
        let requested = match require_param(params, "path") {
            Ok(p) => p,
            Err(failure) => return failure,
        };
        let old_str = match require_param(params, "old_str") {
            Ok(s) => s,
            Err(failure) => return failure,
        };
        let new_str = match params.get("new_str") {
            Some(s) => s.as_str(),
            None => return ToolResult::err("missing required parameter: new_str"),
        };
        let path = match self.policy.resolve(requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::err(format!("failed to read '{}': {e}", path.display()))
            }
        };

        if !content.contains(old_str) {
            return ToolResult::err(format!(
                "old_str not found in {} (copy it exactly from read_file output)",
                path.display()
            ));
        }

        let updated = content.replacen(old_str, new_str, 1);
        match fs::write(&path, &updated).await {
            Ok(()) => ToolResult::ok(format!("Replaced 1 occurrence in {}", path.display())),
            Err(e) => ToolResult::err(format!("failed to write '{}': {e}", path.display())),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ListDirectoryTool {
    policy: Arc<PathPolicy>,
}

impl ListDirectoryTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait::async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, one per line (directories end with /)"
    }

    fn parameters(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] =
            &[ParamSpec::required("path", ParamType::String, "Directory to list")];
        PARAMS
    }

    async fn execute(&self, params: &ToolParams) -> ToolResult {
        let requested = match require_param(params, "path") {
            Ok(p) => p,
            Err(failure) => return failure,
        };
        let path = match self.policy.resolve(requested) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(e),
        };

        let mut read_dir = match fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => {
                return ToolResult::err(format!(
                    "failed to read directory '{}': {e}",
                    path.display()
                ))
            }
        };

        let mut entries: Vec<String> = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let is_dir = entry
                        .file_type()
                        .await
                        .map(|t| t.is_dir())
                        .unwrap_or(false);
                    entries.push(if is_dir { format!("{name}/") } else { name });
                }
                Ok(None) => break,
                Err(e) => return ToolResult::err(format!("failed to read directory entry: {e}")),
            }
        }

        // Sorted for deterministic output.
        entries.sort();
        ToolResult::ok(entries.join("\n"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(ws: &TempDir) -> Arc<PathPolicy> {
        Arc::new(PathPolicy::new(ws.path()))
    }

    fn params(pairs: &[(&str, &str)]) -> ToolParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let ws = TempDir::new().unwrap();
        let err = policy(&ws).resolve("../etc/passwd").unwrap_err();
        assert!(err.contains(".."));
    }

    #[test]
    fn resolve_rejects_path_outside_roots() {
        let ws = TempDir::new().unwrap();
        let err = policy(&ws).resolve("/etc/passwd").unwrap_err();
        assert!(err.contains("not allowed"));
    }

    #[test]
    fn resolve_accepts_relative_and_absolute_inside_roots() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("a.txt"), "x").unwrap();
        let policy = policy(&ws);

        assert!(policy.resolve("a.txt").is_ok());
        let abs = ws.path().join("a.txt");
        assert!(policy.resolve(abs.to_str().unwrap()).is_ok());
    }

    #[test]
    fn resolve_accepts_not_yet_existing_file() {
        let ws = TempDir::new().unwrap();
        let resolved = policy(&ws).resolve("sub/dir/new.txt").unwrap();
        assert!(resolved.ends_with("sub/dir/new.txt"));
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let ws = TempDir::new().unwrap();
        let policy = policy(&ws);

        let write = WriteFileTool::new(policy.clone());
        let result = write
            .execute(&params(&[("path", "out.txt"), ("content", "hello\nworld\n")]))
            .await;
        assert!(result.success, "{:?}", result.error);

        let read = ReadFileTool::new(policy);
        let result = read.execute(&params(&[("path", "out.txt")])).await;
        assert!(result.success);
        assert_eq!(result.output, "hello\nworld\n");
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("lines.txt"), "l0\nl1\nl2\nl3\n").unwrap();

        let read = ReadFileTool::new(policy(&ws));
        let result = read
            .execute(&params(&[("path", "lines.txt"), ("offset", "1"), ("limit", "2")]))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "l1\nl2");
    }

    #[tokio::test]
    async fn read_missing_file_reports_not_found() {
        let ws = TempDir::new().unwrap();
        let read = ReadFileTool::new(policy(&ws));
        let result = read.execute(&params(&[("path", "ghost.txt")])).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn str_replace_replaces_first_occurrence() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("f.txt"), "aaa bbb aaa").unwrap();

        let tool = StrReplaceTool::new(policy(&ws));
        let result = tool
            .execute(&params(&[("path", "f.txt"), ("old_str", "aaa"), ("new_str", "ccc")]))
            .await;
        assert!(result.success);
        assert_eq!(
            std::fs::read_to_string(ws.path().join("f.txt")).unwrap(),
            "ccc bbb aaa"
        );
    }

    #[tokio::test]
    async fn str_replace_fails_when_old_str_absent() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("f.txt"), "content").unwrap();

        let tool = StrReplaceTool::new(policy(&ws));
        let result = tool
            .execute(&params(&[("path", "f.txt"), ("old_str", "missing"), ("new_str", "x")]))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn list_directory_sorted_with_dir_suffix() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("b.txt"), "").unwrap();
        std::fs::write(ws.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();

        let tool = ListDirectoryTool::new(policy(&ws));
        let result = tool.execute(&params(&[("path", ".")])).await;
        assert!(result.success);
        assert_eq!(result.output, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn empty_directory_lists_empty_output() {
        let ws = TempDir::new().unwrap();
        let tool = ListDirectoryTool::new(policy(&ws));
        let result = tool.execute(&params(&[("path", ".")])).await;
        assert!(result.success);
        assert_eq!(result.output, "");
    }
}
