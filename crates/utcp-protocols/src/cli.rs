//! CLI transport: multi-step shell workflows
//!
//! TigerStyle: One shell process per call, bounded by a timeout.
//!
//! All steps of a call run in a single `bash` process so that `cd` and
//! exported variables carry over. Each step's combined stdout/stderr is
//! captured into `CMD_<i>_OUTPUT`, which later steps may reference. Steps
//! flagged with `append_to_final_output` (by default only the last) are
//! printed in order and form the result.
//!
//! Argument placeholders `UTCP_ARG_<name>_UTCP_END` are replaced with the raw
//! argument text. Values are not shell-quoted; callers that pass untrusted
//! input must quote it themselves.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use utcp_core::{
    Auth, CallTemplate, CommunicationProtocol, Error, ProtocolCaller, RegisterManualResult,
    Result, UtcpManual,
};

/// Discriminator for CLI call templates
pub const CALL_TEMPLATE_TYPE: &str = "cli";

/// Default workflow timeout in milliseconds
pub const CLI_TIMEOUT_MS_DEFAULT: u64 = 60_000;

/// Maximum number of steps in one workflow
pub const CLI_COMMANDS_COUNT_MAX: usize = 256;

/// Shell used to run workflows
const SHELL: &str = "bash";

static ARG_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"UTCP_ARG_([A-Za-z0-9_]+?)_UTCP_END").expect("placeholder pattern is a valid regex")
});

fn default_call_template_type() -> String {
    CALL_TEMPLATE_TYPE.to_string()
}

fn default_timeout_ms() -> u64 {
    CLI_TIMEOUT_MS_DEFAULT
}

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliCommand {
    /// Shell command text
    pub command: String,
    /// Include this step's output in the result; defaults to true for the last step only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_to_final_output: Option<bool>,
}

impl CliCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            append_to_final_output: None,
        }
    }

    pub fn with_append_to_final_output(mut self, append: bool) -> Self {
        self.append_to_final_output = Some(append);
        self
    }

    fn is_cd(&self) -> bool {
        let trimmed = self.command.trim_start();
        trimmed == "cd" || trimmed.starts_with("cd ") || trimmed.starts_with("cd\t")
    }
}

/// Call template describing a shell workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliCallTemplate {
    #[serde(default = "default_call_template_type")]
    pub call_template_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub commands: Vec<CliCommand>,
    /// Extra environment for the shell, on top of the inherited one
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env_vars: HashMap<String, String>,
    /// Working directory, relative paths resolved against the client root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl CliCallTemplate {
    pub fn new(commands: Vec<CliCommand>) -> Self {
        Self {
            call_template_type: default_call_template_type(),
            name: None,
            commands,
            env_vars: HashMap::new(),
            working_dir: None,
            timeout_ms: CLI_TIMEOUT_MS_DEFAULT,
            auth: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn to_call_template(&self) -> Result<CallTemplate> {
        CallTemplate::from_typed(self)
    }

    fn validate(&self) -> Result<()> {
        if self.commands.is_empty() {
            return Err(Error::validation("commands", "at least one command is required"));
        }
        if self.commands.len() > CLI_COMMANDS_COUNT_MAX {
            return Err(Error::validation(
                "commands",
                format!("too many commands: {} (max {})", self.commands.len(), CLI_COMMANDS_COUNT_MAX),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::validation("timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

// =============================================================================
// Script assembly
// =============================================================================

/// Replace argument placeholders with raw argument text
fn substitute_args(command: &str, args: &Map<String, Value>) -> String {
    ARG_PLACEHOLDER
        .replace_all(command, |caps: &Captures<'_>| match args.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                warn!(argument = %&caps[1], "No argument for placeholder, leaving it in place");
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Build the bash script for a workflow
pub(crate) fn build_script(commands: &[CliCommand], args: &Map<String, Value>) -> String {
    assert!(!commands.is_empty(), "workflow needs at least one command");

    let last = commands.len() - 1;
    let mut script = String::from("set -e\n");

    for (i, step) in commands.iter().enumerate() {
        let var = format!("CMD_{}_OUTPUT", i);
        let command = substitute_args(&step.command, args);

        if step.is_cd() {
            let _ = writeln!(script, "{}", command);
            let _ = writeln!(script, "{}=\"\"", var);
            continue;
        }

        // Captured output is echoed to stderr before exiting so failures carry it
        let _ = writeln!(
            script,
            "{var}=$( {{ {command}\n}} 2>&1 ) || {{ __utcp_status=$?; printf '%s\\n' \"${var}\" >&2; exit \"$__utcp_status\"; }}",
        );
        let _ = writeln!(script, "{var}=\"${{{var}#\"${{{var}%%[![:space:]]*}}\"}}\"");
        let _ = writeln!(script, "{var}=\"${{{var}%\"${{{var}##*[![:space:]]}}\"}}\"");
    }

    for (i, step) in commands.iter().enumerate() {
        if step.append_to_final_output.unwrap_or(i == last) {
            let _ = writeln!(script, "printf '%s\\n' \"$CMD_{}_OUTPUT\"", i);
        }
    }

    script
}

/// Parse trimmed stdout as JSON when possible
fn parse_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

// =============================================================================
// Protocol
// =============================================================================

/// Runs shell workflows
#[derive(Debug, Default)]
pub struct CliCommunicationProtocol;

impl CliCommunicationProtocol {
    pub fn new() -> Self {
        Self
    }

    /// Run a workflow and return its stdout
    async fn run(
        &self,
        caller: &dyn ProtocolCaller,
        template: &CliCallTemplate,
        args: &Map<String, Value>,
    ) -> Result<String> {
        template.validate()?;
        let script = build_script(&template.commands, args);

        let mut command = Command::new(SHELL);
        command
            .arg("-c")
            .arg(&script)
            .envs(&template.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &template.working_dir {
            command.current_dir(caller.resolve_path(Path::new(dir)));
        }

        let child = command
            .spawn()
            .map_err(|e| Error::transport(CALL_TEMPLATE_TYPE, format!("failed to spawn {}: {}", SHELL, e)))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = tokio::time::timeout(
            Duration::from_millis(template.timeout_ms),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| Error::timeout("cli workflow", template.timeout_ms))??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::CommandFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl CommunicationProtocol for CliCommunicationProtocol {
    fn protocol_name(&self) -> &str {
        CALL_TEMPLATE_TYPE
    }

    async fn register_manual(
        &self,
        caller: &dyn ProtocolCaller,
        manual_call_template: &CallTemplate,
    ) -> Result<RegisterManualResult> {
        let template: CliCallTemplate = manual_call_template.parse_as()?;
        template.validate()?;
        let manual_name = template.name.clone().unwrap_or_default();
        info!(manual = %manual_name, steps = template.commands.len(), "Discovering CLI manual");

        let discovered = match self.run(caller, &template, &Map::new()).await {
            Ok(stdout) => match serde_json::from_str::<Value>(stdout.trim()) {
                Ok(document) if UtcpManual::is_manual_document(&document) => {
                    serde_json::from_value::<UtcpManual>(document)
                        .map_err(|e| Error::discovery_format(format!("invalid manual: {}", e)))
                }
                Ok(_) => Err(Error::discovery_format(
                    "discovery output is not a UTCP manual",
                )),
                Err(e) => Err(Error::discovery_format(format!(
                    "discovery output is not valid JSON: {}",
                    e
                ))),
            },
            Err(e) => Err(e),
        };

        match discovered {
            Ok(manual) => Ok(RegisterManualResult::success(manual_call_template.clone(), manual)),
            Err(e) => {
                warn!(manual = %manual_name, error = %e, "CLI manual discovery failed");
                Ok(RegisterManualResult::failure(
                    manual_call_template.clone(),
                    vec![e.to_string()],
                ))
            }
        }
    }

    async fn deregister_manual(
        &self,
        _caller: &dyn ProtocolCaller,
        _manual_call_template: &CallTemplate,
    ) -> Result<()> {
        Ok(())
    }

    async fn call_tool(
        &self,
        caller: &dyn ProtocolCaller,
        tool_name: &str,
        args: &Map<String, Value>,
        tool_call_template: &CallTemplate,
    ) -> Result<Value> {
        let template: CliCallTemplate = tool_call_template.parse_as()?;
        debug!(tool = %tool_name, steps = template.commands.len(), "Running CLI workflow");
        let stdout = self.run(caller, &template, args).await?;
        Ok(parse_output(&stdout))
    }
}
