// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use regex::Regex;

/// Placeholder filled by the whole argument string when the user passes no
/// structured parameters.
const PARAMETERS: &str = "{{PARAMETERS}}";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InterpolateError {
    #[error("Missing required parameters: {0}")]
    MissingParameters(String),
}

/// Fill a prompt chain's command templates from the post-command text.
///
/// - `key=value` / `key="value"` / `key='value'` tokens form a map that is
///   substituted into every `{{key}}` across the whole chain; any
///   placeholder left unresolved is an error.
/// - A plain string fills `{{PARAMETERS}}` in every command when present
///   (other placeholders are then forbidden), and is otherwise appended to
///   the first command only.
/// - No argument leaves the commands verbatim, still subject to the
///   unresolved-placeholder check.
pub fn interpolate(commands: &[String], input: &str) -> Result<Vec<String>, InterpolateError> {
    let input = input.trim();
    let map = parse_key_values(input);

    if !map.is_empty() {
        let filled: Vec<String> = commands
            .iter()
            .map(|cmd| substitute(cmd, &map))
            .collect();
        return check_resolved(filled);
    }

    if input.is_empty() {
        return check_resolved(commands.to_vec());
    }

    if commands.iter().any(|c| c.contains(PARAMETERS)) {
        let filled: Vec<String> = commands
            .iter()
            .map(|c| c.replace(PARAMETERS, input))
            .collect();
        return check_resolved(filled);
    }

    // Plain string, no placeholder anywhere: goes to the first command.
    check_resolved(commands.to_vec()).map(|mut cmds| {
        if let Some(first) = cmds.first_mut() {
            first.push(' ');
            first.push_str(input);
        }
        cmds
    })
}

/// Extract `key=value` tokens, honouring single and double quotes around
/// the value.  Returns an empty map when the input carries no such token.
fn parse_key_values(input: &str) -> HashMap<String, String> {
    let re = Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)=(?:"([^"]*)"|'([^']*)'|(\S+))"#).unwrap();
    let mut map = HashMap::new();
    for caps in re.captures_iter(input) {
        let key = caps[1].to_string();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        map.insert(key, value);
    }
    map
}

fn substitute(command: &str, map: &HashMap<String, String>) -> String {
    let mut out = command.to_string();
    for (key, value) in map {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Error with the unresolved placeholder names in order of appearance.
fn check_resolved(commands: Vec<String>) -> Result<Vec<String>, InterpolateError> {
    let re = Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap();
    let mut missing: Vec<String> = Vec::new();
    for cmd in &commands {
        for caps in re.captures_iter(cmd) {
            let name = caps[1].to_string();
            if !missing.contains(&name) {
                missing.push(name);
            }
        }
    }
    if missing.is_empty() {
        Ok(commands)
    } else {
        Err(InterpolateError::MissingParameters(missing.join(", ")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
