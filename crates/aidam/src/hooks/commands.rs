//! Slash-command router.
//!
//! A prompt like `/aidam-usage last week` is checked against
//! `<plugin>/scripts/commands/aidam-usage.{py,sh,js}`. When a script exists
//! it runs instead of the prompt and the prompt is blocked; otherwise the
//! prompt flows through to the assistant untouched.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::Result;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const EXTENSIONS: &[(&str, &str)] = &[(".py", "python3"), (".sh", "bash"), (".js", "node")];

/// Router decision for one prompt.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Not a `/command` prompt (or no matching script); let it through.
    PassThrough,
    /// A script ran; its output goes to the user and the prompt is blocked.
    Executed(String),
}

/// A parsed `/name args` prompt.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    pub name: String,
    pub args: &'a str,
}

/// Split a prompt into command name and argument string. Only prompts that
/// start with `/` and carry a name qualify.
pub fn parse_command(prompt: &str) -> Option<ParsedCommand<'_>> {
    let prompt = prompt.trim();
    let rest = prompt.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next()?.to_ascii_lowercase();
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        name,
        args: parts.next().map(str::trim).unwrap_or(""),
    })
}

/// Locate the script for a command name, trying each known extension.
pub fn find_script(commands_dir: &Path, name: &str) -> Option<(PathBuf, &'static str)> {
    for (ext, runner) in EXTENSIONS {
        let candidate = commands_dir.join(format!("{}{}", name, ext));
        if candidate.is_file() {
            return Some((candidate, runner));
        }
    }
    None
}

/// Route a prompt through the command directory.
pub async fn route(
    plugin_root: &Path,
    commands_dir: &Path,
    prompt: &str,
) -> Result<CommandOutcome> {
    let Some(command) = parse_command(prompt) else {
        return Ok(CommandOutcome::PassThrough);
    };

    let Some((script, runner)) = find_script(commands_dir, &command.name) else {
        return Ok(CommandOutcome::PassThrough);
    };

    let mut process = tokio::process::Command::new(runner);
    process
        .arg(&script)
        .env("AIDAM_CMD_ARGS", command.args)
        .env("AIDAM_PLUGIN_ROOT", plugin_root)
        .current_dir(plugin_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let message = match tokio::time::timeout(COMMAND_TIMEOUT, process.output()).await {
        Ok(Ok(output)) => {
            // Scripts report to the user on stderr (exit 2 surfaces it);
            // stdout is the fallback.
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                format!("/{} executed (no output).", command.name)
            }
        }
        Ok(Err(e)) => format!("/{} error: {}", command.name, e),
        Err(_) => format!(
            "/{} timed out after {}s.",
            command.name,
            COMMAND_TIMEOUT.as_secs()
        ),
    };

    Ok(CommandOutcome::Executed(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_command_name_and_args() {
        let parsed = parse_command("/Aidam-Usage  last week ").unwrap();
        assert_eq!(parsed.name, "aidam-usage");
        assert_eq!(parsed.args, "last week");
    }

    #[test]
    fn test_parse_command_without_args() {
        let parsed = parse_command("/compact").unwrap();
        assert_eq!(parsed.name, "compact");
        assert_eq!(parsed.args, "");
    }

    #[test]
    fn test_non_commands_pass() {
        assert!(parse_command("hello there").is_none());
        assert!(parse_command("/").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn test_find_script_prefers_extension_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.sh"), "echo hi").unwrap();
        std::fs::write(dir.path().join("report.py"), "print('hi')").unwrap();

        let (path, runner) = find_script(dir.path(), "report").unwrap();
        assert!(path.ends_with("report.py"));
        assert_eq!(runner, "python3");
    }

    #[test]
    fn test_find_script_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_script(dir.path(), "ghost").is_none());
    }

    #[tokio::test]
    async fn test_route_runs_shell_script() {
        let dir = tempfile::tempdir().unwrap();
        let commands = dir.path().join("scripts").join("commands");
        std::fs::create_dir_all(&commands).unwrap();
        std::fs::write(
            commands.join("greet.sh"),
            "echo \"args: $AIDAM_CMD_ARGS\" >&2\n",
        )
        .unwrap();

        let outcome = route(dir.path(), &commands, "/greet to you").await.unwrap();
        match outcome {
            CommandOutcome::Executed(message) => assert_eq!(message, "args: to you"),
            other => panic!("expected Executed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_passes_through_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let commands = dir.path().join("commands");
        std::fs::create_dir_all(&commands).unwrap();

        let outcome = route(dir.path(), &commands, "/ghost").await.unwrap();
        assert!(matches!(outcome, CommandOutcome::PassThrough));
    }
}
