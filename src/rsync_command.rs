// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

//! Parser for the rsync command line as it appears in SSH_ORIGINAL_COMMAND,
//! ie. as a space delimited string with no escaping or quoting.

use crate::policy::{Method, Mode, Policy};
use crate::pushbackup_error::PushbackupError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    // rsync encodes protocol version and feature flags into the -e option;
    // the i flag is incremental recursion.
    static ref E_BUNDLE: Regex = Regex::new(r"^-e\d*\.\d*(i?)").unwrap();
}

// Accepted without registration: mode selectors and verbosity switches.
const UNREGISTERED_OK: [&str; 8] = [
    "--sender",
    "--list-only",
    "-q",
    "--quiet",
    "-v",
    "--verbose",
    "-n",
    "--dry-run",
];

#[derive(Debug)]
struct Diagnostic {
    verb: String,
    hint: Option<String>,
}

/// One parsed and policy-checked rsync server invocation.
#[derive(Debug)]
pub struct RsyncCommand {
    opts: BTreeMap<String, Vec<Option<String>>>,
    path: String,
    mode: Mode,
    incremental_recursive: bool,
    errors: BTreeMap<String, Diagnostic>,
    warnings: BTreeMap<String, Diagnostic>,
}

impl RsyncCommand {
    /// Tokenizes `cmdline` and classifies every option against `policy`.
    /// Only structural problems are `Err`; policy violations are collected
    /// into the messages and reported through `command()` returning `None`.
    pub fn parse(policy: &Policy, cmdline: &str) -> Result<RsyncCommand, PushbackupError> {
        let rest = cmdline.strip_prefix("rsync --server ").ok_or_else(|| {
            PushbackupError::InvalidCommand(String::from("shell access not allowed, use rsync"))
        })?;

        let mut rest = rest.to_string();
        let mut opts: BTreeMap<String, Vec<Option<String>>> = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut incremental_recursive = false;

        while rest.starts_with('-') {
            if rest.starts_with("--") {
                let (token, tail) = match rest.split_once(' ') {
                    Some((token, tail)) => (token.to_string(), tail.to_string()),
                    None => break,
                };
                rest = tail;
                // rsync always passes long option values as --option=value.
                let (name, value) = match token.split_once('=') {
                    Some((name, value)) => (format!("{}=", name), Some(value.to_string())),
                    None => (token, None),
                };
                opts.entry(name).or_default().push(value);
            } else if rest.starts_with("-e") {
                let (token, tail) = match rest.split_once(' ') {
                    Some((token, tail)) => (token.to_string(), tail.to_string()),
                    None => break,
                };
                rest = tail;
                match E_BUNDLE.captures(&token) {
                    Some(caps) => incremental_recursive = !caps[1].is_empty(),
                    None => {
                        errors.insert(
                            "-e".to_string(),
                            Diagnostic {
                                verb: format!("strange -e options string {}", token),
                                hint: None,
                            },
                        );
                    }
                }
                opts.entry(token).or_default().push(None);
            } else if rest.starts_with("- ") {
                // rsync emits a lone dash once a short option cluster is
                // exhausted.
                rest = rest[2..].to_string();
            } else if rest.len() >= 2 && rest.is_char_boundary(2) {
                let name = rest[..2].to_string();
                opts.entry(name).or_default().push(None);
                // Drop the consumed letter but keep the cluster's dash.
                rest.remove(1);
            } else {
                break;
            }
        }

        if !rest.starts_with(". ") {
            return Err(PushbackupError::InvalidCommand(format!(
                "rsync --server must give source as \".\", but found {}",
                rest
            )));
        }
        let path = rest[2..].to_string();

        let mode = if opts.contains_key("--list-only") {
            // --list-only overrides (implies?) -n
            Mode::List
        } else if opts.contains_key("-n") || opts.contains_key("--dry-run") {
            Mode::Verify
        } else if opts.contains_key("--sender") {
            Mode::Restore
        } else {
            Mode::Backup
        };

        let mut cmd = RsyncCommand {
            opts,
            path,
            mode,
            incremental_recursive,
            errors,
            warnings: BTreeMap::new(),
        };
        cmd.classify(policy);
        Ok(cmd)
    }

    fn classify(&mut self, policy: &Policy) {
        for (name, verdict) in policy.rules_for(self.mode) {
            let present = self.opts.contains_key(name);
            let (verb, to_errors) = match (verdict.method, present, verdict.hard) {
                (Method::Require, false, true) => ("must use", true),
                (Method::Require, false, false) => ("consider using", false),
                (Method::Deny, true, true) => ("do not use", true),
                (Method::Deny, true, false) => ("avoid using", false),
                _ => continue,
            };
            let diag = Diagnostic {
                verb: verb.to_string(),
                hint: verdict.hint.clone(),
            };
            if to_errors {
                self.errors.insert(verdict.alias.clone(), diag);
            } else {
                self.warnings.insert(verdict.alias.clone(), diag);
            }
        }

        let unknown: Vec<String> = self
            .opts
            .keys()
            .filter(|name| {
                // -e feature bundles were already vetted during tokenizing.
                !name.starts_with("-e")
                    && !UNREGISTERED_OK.contains(&name.as_str())
                    && policy.verdict(self.mode, name).is_none()
            })
            .cloned()
            .collect();
        for name in unknown {
            self.errors.insert(
                name,
                Diagnostic {
                    verb: "unknown option".to_string(),
                    hint: None,
                },
            );
        }

        if self.opts.contains_key("-r") && !self.incremental_recursive {
            self.warnings.insert(
                "--inc-recursive".to_string(),
                Diagnostic {
                    verb: "incremental recursion not enabled, consider using".to_string(),
                    hint: None,
                },
            );
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_quiet(&self) -> bool {
        self.opts.contains_key("-q") || self.opts.contains_key("--quiet")
    }

    pub fn is_verbose(&self) -> bool {
        self.opts.contains_key("-v") || self.opts.contains_key("--verbose")
    }

    /// Diagnostics for the remote user: errors first, then warnings, each
    /// group sorted by message key.
    pub fn messages(&self) -> Vec<String> {
        let mut msgs = Vec::new();
        for (severity, diags) in [("ERROR", &self.errors), ("WARNING", &self.warnings)] {
            for (key, diag) in diags.iter() {
                match &diag.hint {
                    Some(hint) => msgs.push(format!("{} {} {} ({})", severity, diag.verb, key, hint)),
                    None => msgs.push(format!("{} {} {}", severity, diag.verb, key)),
                }
            }
        }
        msgs
    }

    /// The sanitized argument vector, or `None` if any error was flagged.
    /// Options are emitted sorted by name and value so that identical
    /// invocations produce identical commands.
    pub fn command(&self) -> Option<Vec<String>> {
        if !self.errors.is_empty() {
            return None;
        }
        let mut cmd = vec!["rsync".to_string(), "--server".to_string()];
        for (name, values) in &self.opts {
            let mut values = values.clone();
            values.sort();
            for value in values {
                match value {
                    Some(value) => cmd.push(format!("{}{}", name, value)),
                    None => cmd.push(name.clone()),
                }
            }
        }
        Some(cmd)
    }

    /// The single path argument after the ". " sentinel, verbatim.
    pub fn path(&self) -> Option<&str> {
        if self.errors.is_empty() {
            Some(&self.path)
        } else {
            None
        }
    }
}
