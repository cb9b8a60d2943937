//! Registry and sandboxed executor for generated tool scripts.
//!
//! Every registered script must resolve under the single tool root
//! (`<HOME>/.claude/generated_tools/` by default). Both the root and the
//! candidate are canonicalized before the prefix check, so symlinks cannot
//! smuggle a script out of the root.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::{debug, warn};

use crate::store::Store;
use crate::{AidamError, Result};

/// Hard wall-clock limit for one tool run.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(30);
const STDOUT_CAP: usize = 4_000;
const STDERR_CAP: usize = 2_000;

/// Supported script languages and their launchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Bash,
    Python,
    Javascript,
}

impl Language {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bash" | "sh" => Ok(Self::Bash),
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" | "node" => Ok(Self::Javascript),
            other => Err(AidamError::validation(format!(
                "unsupported tool language '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Python => "python",
            Self::Javascript => "javascript",
        }
    }

    fn launcher(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Python => "python3",
            Self::Javascript => "node",
        }
    }
}

/// One `generated_tools` row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct GeneratedTool {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub file_path: String,
    pub language: String,
    pub tags: Option<Vec<String>>,
    pub is_active: bool,
    pub usage_count: i32,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Result envelope for one execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout {
        seconds: u64,
    },
}

#[derive(Clone)]
pub struct ToolRegistry {
    store: Store,
    root: PathBuf,
    home: PathBuf,
}

impl ToolRegistry {
    pub fn new(store: Store, root: PathBuf, home: PathBuf) -> Self {
        Self { store, root, home }
    }

    /// Register (or re-register) a script by unique name.
    ///
    /// Relative paths resolve under the tool root; the result must stay
    /// inside it and the file must exist. Also mirrors the tool into the
    /// knowledge index so retrieval can surface it.
    pub async fn register(
        &self,
        name: &str,
        description: &str,
        file_path: &str,
        language: &str,
        tags: &[String],
    ) -> Result<GeneratedTool> {
        let language = Language::parse(language)?;
        let resolved = self.resolve_and_verify(file_path)?;
        let stored_path = resolved
            .to_str()
            .ok_or_else(|| AidamError::validation("tool path is not valid UTF-8"))?;

        let tool = sqlx::query_as::<_, GeneratedTool>(
            r#"
            INSERT INTO generated_tools (name, description, file_path, language, tags, is_active)
            VALUES ($1, $2, $3, $4, $5, true)
            ON CONFLICT (name) DO UPDATE
            SET description = EXCLUDED.description,
                file_path = EXCLUDED.file_path,
                language = EXCLUDED.language,
                tags = EXCLUDED.tags,
                is_active = true
            RETURNING id, name, description, file_path, language, tags, is_active,
                      usage_count, last_used_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(stored_path)
        .bind(language.as_str())
        .bind(tags)
        .fetch_one(self.store.pool())
        .await?;

        self.store
            .upsert_knowledge_index("generated-tools", name, description, Some(stored_path))
            .await?;

        debug!("registered tool '{}' at {}", name, stored_path);
        Ok(tool)
    }

    /// Execute an active tool by name with a hard 30-second timeout.
    pub async fn execute(&self, name: &str, args: &[String]) -> Result<ToolOutcome> {
        let tool = self.lookup_active(name).await?;
        let language = Language::parse(&tool.language)?;
        // The path was verified at registration; re-verify in case the
        // filesystem changed underneath the registry.
        let path = self.resolve_and_verify(&tool.file_path)?;

        let mut command = tokio::process::Command::new(language.launcher());
        command
            .arg(&path)
            .args(args)
            .current_dir(&self.home)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(EXEC_TIMEOUT, command.output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("tool '{}' exceeded the {}s timeout", name, EXEC_TIMEOUT.as_secs());
                return Ok(ToolOutcome::Timeout {
                    seconds: EXEC_TIMEOUT.as_secs(),
                });
            }
        };

        self.record_usage(tool.id).await?;

        Ok(ToolOutcome::Completed {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate(&String::from_utf8_lossy(&output.stdout), STDOUT_CAP),
            stderr: truncate(&String::from_utf8_lossy(&output.stderr), STDERR_CAP),
        })
    }

    /// List active tools, most used first.
    pub async fn list(&self) -> Result<Vec<GeneratedTool>> {
        let rows = sqlx::query_as::<_, GeneratedTool>(
            r#"
            SELECT id, name, description, file_path, language, tags, is_active,
                   usage_count, last_used_at
            FROM generated_tools
            WHERE is_active
            ORDER BY usage_count DESC, name
            "#,
        )
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }

    async fn lookup_active(&self, name: &str) -> Result<GeneratedTool> {
        sqlx::query_as::<_, GeneratedTool>(
            r#"
            SELECT id, name, description, file_path, language, tags, is_active,
                   usage_count, last_used_at
            FROM generated_tools
            WHERE name = $1 AND is_active
            "#,
        )
        .bind(name)
        .fetch_optional(self.store.pool())
        .await?
        .ok_or_else(|| AidamError::not_found(format!("tool '{}'", name)))
    }

    async fn record_usage(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE generated_tools SET usage_count = usage_count + 1, last_used_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    fn resolve_and_verify(&self, file_path: &str) -> Result<PathBuf> {
        verify_under_root(&self.root, file_path)
    }
}

/// Resolve `candidate` (relative paths land under `root`) and prove the
/// canonical result still lives under the canonical root.
pub fn verify_under_root(root: &Path, candidate: &str) -> Result<PathBuf> {
    let target = {
        let p = Path::new(candidate);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            root.join(p)
        }
    };

    let canonical_root = root
        .canonicalize()
        .map_err(|e| AidamError::validation(format!("tool root {}: {}", root.display(), e)))?;
    let canonical_target = target.canonicalize().map_err(|_| {
        AidamError::validation(format!("tool file does not exist: {}", target.display()))
    })?;

    if !canonical_target.starts_with(&canonical_root) {
        return Err(AidamError::validation(format!(
            "tool path escapes the tool root: {}",
            candidate
        )));
    }

    Ok(canonical_target)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_with_script() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hello.sh");
        std::fs::write(&script, "#!/bin/sh\necho hello\n").unwrap();
        (dir, script)
    }

    #[test]
    fn test_relative_path_resolves_under_root() {
        let (dir, script) = root_with_script();
        let resolved = verify_under_root(dir.path(), "hello.sh").unwrap();
        assert_eq!(resolved, script.canonicalize().unwrap());
    }

    #[test]
    fn test_absolute_path_inside_root_is_fine() {
        let (dir, script) = root_with_script();
        let resolved = verify_under_root(dir.path(), script.to_str().unwrap()).unwrap();
        assert_eq!(resolved, script.canonicalize().unwrap());
    }

    #[test]
    fn test_traversal_is_rejected() {
        let (dir, _script) = root_with_script();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let sneaky = format!("../{}", outside.path().file_name().unwrap().to_str().unwrap());

        assert!(matches!(
            verify_under_root(dir.path(), &sneaky),
            Err(AidamError::Validation { .. })
        ));
        assert!(matches!(
            verify_under_root(dir.path(), outside.path().to_str().unwrap()),
            Err(AidamError::Validation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (dir, _script) = root_with_script();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let link = dir.path().join("link.sh");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        // The symlink sits inside the root but canonicalizes outside it.
        assert!(matches!(
            verify_under_root(dir.path(), "link.sh"),
            Err(AidamError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify_under_root(dir.path(), "ghost.py"),
            Err(AidamError::Validation { .. })
        ));
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!(Language::parse("bash").unwrap(), Language::Bash);
        assert_eq!(Language::parse("Python").unwrap(), Language::Python);
        assert_eq!(Language::parse("js").unwrap(), Language::Javascript);
        assert!(Language::parse("fortran").is_err());
    }

    #[test]
    fn test_launchers() {
        assert_eq!(Language::Bash.launcher(), "bash");
        assert_eq!(Language::Python.launcher(), "python3");
        assert_eq!(Language::Javascript.launcher(), "node");
    }
}
