// src/exec/command.rs

//! Child command-line assembly.
//!
//! [`tokenize`] splits operator-supplied option strings into argv tokens, and
//! [`build_peon_command`] lays out the full child invocation. Both are pure
//! so the exact argv a task would get can be asserted without spawning
//! anything.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::config::{ForkingConfig, Properties, JAVA_OPTS_PROPERTY};
use crate::task::Task;

/// Property-name prefix stripped off and forwarded to children verbatim.
pub const CHILD_PROPERTY_PREFIX: &str = "druid.indexer.fork.property.";

/// Prefix for the metric-dimension properties every child receives.
pub const METRIC_DIMENSION_PREFIX: &str = "druid.metrics.emitter.dimension.";

const CLASSPATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Split a string of options into argv tokens.
///
/// Two forms are accepted:
/// 1. A JSON array of strings yields its elements verbatim; this is the
///    unambiguous escape hatch.
/// 2. Anything else is split on whitespace, except inside double-quoted
///    regions. Quote characters toggle the in-quotes state and are retained
///    in the output (e.g. `-Dfoo="a b"` stays one token, quotes included).
///    Empty tokens are dropped.
pub fn tokenize(s: &str) -> Vec<String> {
    if let Ok(tokens) = serde_json::from_str::<Vec<String>>(s) {
        return tokens;
    }
    debug!(input = %s, "options are not a JSON array; splitting on whitespace");

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in s.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        if !in_quotes && c.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Lay out the argv for one attempt of `task`.
///
/// Ordering matters: `-D` flags appended later win at the child's option
/// parser, so globally allowed properties come first, then global
/// fork-prefixed overrides, then task-context overrides.
#[allow(clippy::too_many_arguments)]
pub fn build_peon_command(
    config: &ForkingConfig,
    props: &Properties,
    node_host: &str,
    task: &Task,
    child_port: u16,
    chat_handler_port: Option<u16>,
    task_file: &Path,
    status_file: &Path,
) -> Vec<String> {
    let mut command = Vec::new();

    command.push(config.java_command.clone());
    command.push("-cp".to_string());
    command.push(match &task.classpath_prefix {
        Some(prefix) if !prefix.is_empty() => {
            format!("{}{}{}", prefix, CLASSPATH_SEPARATOR, config.classpath)
        }
        _ => config.classpath.clone(),
    });

    command.extend(tokenize(&config.java_opts));

    // Task-specific java opts override the global ones.
    if let Some(task_java_opts) = task.context_str(JAVA_OPTS_PROPERTY) {
        command.extend(tokenize(task_java_opts));
    }

    for (name, value) in props {
        if name != JAVA_OPTS_PROPERTY
            && config.allowed_prefixes.iter().any(|p| name.starts_with(p))
        {
            command.push(format!("-D{name}={value}"));
        }
    }

    // Child-specific overrides from global properties, then from the task
    // context; both drop the fork prefix.
    for (name, value) in props {
        if let Some(stripped) = name.strip_prefix(CHILD_PROPERTY_PREFIX) {
            command.push(format!("-D{stripped}={value}"));
        }
    }
    for (name, value) in &task.context {
        if let Some(stripped) = name.strip_prefix(CHILD_PROPERTY_PREFIX) {
            command.push(format!("-D{stripped}={}", context_value_string(value)));
        }
    }

    // dataSource and taskId dimensions for the child's metrics.
    command.push(format!(
        "-D{METRIC_DIMENSION_PREFIX}dataSource={}",
        task.data_source
    ));
    command.push(format!("-D{METRIC_DIMENSION_PREFIX}taskId={}", task.id));

    command.push(format!("-Ddruid.host={node_host}"));
    command.push(format!("-Ddruid.port={child_port}"));

    if let Some(chat_port) = chat_handler_port {
        // The real service name is registered by the child itself; the
        // placeholder is ignored.
        command.push(
            "-Ddruid.indexer.task.chathandler.service=placeholder/serviceName".to_string(),
        );
        command.push(format!(
            "-Ddruid.indexer.task.chathandler.host={node_host}"
        ));
        command.push(format!(
            "-Ddruid.indexer.task.chathandler.port={chat_port}"
        ));
    }

    command.push("io.druid.cli.Main".to_string());
    command.push("internal".to_string());
    command.push("peon".to_string());
    command.push(task_file.display().to_string());
    command.push(status_file.display().to_string());

    if let Some(node_type) = &task.node_type {
        command.push("--nodeType".to_string());
        command.push(node_type.clone());
    }

    command
}

fn context_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
