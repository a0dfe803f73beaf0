// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

//! Per-mode verdict table for rsync server options.

use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Backup,
    Restore,
    Verify,
    List,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Backup, Mode::Restore, Mode::Verify, Mode::List];

    fn index(self) -> usize {
        match self {
            Mode::Backup => 0,
            Mode::Restore => 1,
            Mode::Verify => 2,
            Mode::List => 3,
        }
    }

    fn from_name(name: &str) -> Option<Mode> {
        match name {
            "backup" => Some(Mode::Backup),
            "restore" => Some(Mode::Restore),
            "verify" => Some(Mode::Verify),
            "list" => Some(Mode::List),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Backup => "backup",
            Mode::Restore => "restore",
            Mode::Verify => "verify",
            Mode::List => "list",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Verdict requested at registration time.  Discourage and recommend are the
/// soft variants of deny and require: they downgrade the message from ERROR
/// to WARNING.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Action {
    Allow,
    Deny,
    Require,
    Discourage,
    Recommend,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Method {
    Allow,
    Deny,
    Require,
}

#[derive(Clone, Debug)]
pub(crate) struct Verdict {
    pub(crate) method: Method,
    pub(crate) hard: bool,
    pub(crate) alias: String,
    pub(crate) hint: Option<String>,
}

/// Option names map to one verdict slot per mode.  Registering the same name
/// again for a mode overwrites the earlier verdict.
#[derive(Default)]
pub struct Policy {
    rules: HashMap<String, [Option<Verdict>; 4]>,
}

impl Policy {
    pub fn new() -> Self {
        Policy::default()
    }

    /// Registers `names` under explicit per-mode-set verdicts.  Each entry of
    /// `specs` is a space-separated mode set, an action, and an optional
    /// hint.  A name may carry its long form after an embedded space
    /// (`"-a --archive"`); the first word is the option name and the pair is
    /// displayed as `-a / --archive` unless `alias` overrides it.
    ///
    /// An unknown mode name is a mistake in the rule table itself and
    /// panics, the same way a bad structopt declaration would.
    pub fn add(&mut self, specs: &[(&str, Action, Option<&str>)], names: &[&str], alias: Option<&str>) {
        for (modes, action, hint) in specs {
            for mode in modes.split(' ') {
                let mode = Mode::from_name(mode)
                    .unwrap_or_else(|| panic!("illegal mode {} in option rules", mode));
                self.register(mode, *action, *hint, names, alias);
            }
        }
    }

    pub fn allow(&mut self, names: &[&str], hint: Option<&str>) {
        self.add_all_modes(Action::Allow, names, hint);
    }

    pub fn deny(&mut self, names: &[&str], hint: Option<&str>) {
        self.add_all_modes(Action::Deny, names, hint);
    }

    pub fn require(&mut self, names: &[&str], hint: Option<&str>) {
        self.add_all_modes(Action::Require, names, hint);
    }

    pub fn discourage(&mut self, names: &[&str], hint: Option<&str>) {
        self.add_all_modes(Action::Discourage, names, hint);
    }

    pub fn recommend(&mut self, names: &[&str], hint: Option<&str>) {
        self.add_all_modes(Action::Recommend, names, hint);
    }

    fn add_all_modes(&mut self, action: Action, names: &[&str], hint: Option<&str>) {
        for mode in Mode::ALL {
            self.register(mode, action, hint, names, None);
        }
    }

    fn register(
        &mut self,
        mode: Mode,
        action: Action,
        hint: Option<&str>,
        names: &[&str],
        alias: Option<&str>,
    ) {
        let (method, hard) = match action {
            Action::Allow => (Method::Allow, true),
            Action::Deny => (Method::Deny, true),
            Action::Require => (Method::Require, true),
            Action::Discourage => (Method::Deny, false),
            Action::Recommend => (Method::Require, false),
        };
        for &spec in names {
            let display = alias.unwrap_or(spec).replacen(' ', " / ", 1);
            let name = spec.split(' ').next().unwrap_or(spec);
            let slots = self
                .rules
                .entry(name.to_string())
                .or_insert_with(|| [None, None, None, None]);
            slots[mode.index()] = Some(Verdict {
                method,
                hard,
                alias: display,
                hint: hint.map(String::from),
            });
        }
    }

    pub(crate) fn verdict(&self, mode: Mode, name: &str) -> Option<&Verdict> {
        self.rules
            .get(name)
            .and_then(|slots| slots[mode.index()].as_ref())
    }

    pub(crate) fn rules_for(&self, mode: Mode) -> impl Iterator<Item = (&str, &Verdict)> {
        self.rules.iter().filter_map(move |(name, slots)| {
            slots[mode.index()].as_ref().map(|v| (name.as_str(), v))
        })
    }
}
