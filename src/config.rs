// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

//! Parser for the systemd-style config file format.  The stock ini parsers
//! don't support repeatable keys, which the exclude= option needs.

use crate::pushbackup_error::PushbackupError;
use chrono::Duration;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Duration(Duration),
    List(Vec<String>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Kind {
    Str,
    Int,
    Duration,
    List,
}

struct KeySpec {
    kind: Kind,
    default: Option<ConfigValue>,
}

/// Sectioned key=value store bound to one (host, space) pair.  Reading a key
/// falls back through the `host:space`, `host` and `global` sections before
/// hitting the registered default.
pub struct ConfigParser {
    host: String,
    space_section: String,
    keys: HashMap<String, KeySpec>,
    values: HashMap<String, HashMap<String, ConfigValue>>,
    section_order: Vec<String>,
}

impl ConfigParser {
    pub fn new(host: &str, space: &str) -> Result<Self, PushbackupError> {
        if host.contains(':') {
            return Err(PushbackupError::InvalidConfig(format!(
                "colons not permitted in hostname {}",
                host
            )));
        }
        Ok(ConfigParser {
            host: host.to_string(),
            space_section: format!("{}:{}", host, space),
            keys: HashMap::new(),
            values: HashMap::new(),
            section_order: Vec::new(),
        })
    }

    pub fn add_str(&mut self, key: &str, default: Option<&str>) {
        self.register(key, Kind::Str, default.map(|d| ConfigValue::Str(d.to_string())));
    }

    pub fn add_int(&mut self, key: &str, default: Option<i64>) {
        self.register(key, Kind::Int, default.map(ConfigValue::Int));
    }

    pub fn add_duration(&mut self, key: &str, default: Option<Duration>) {
        self.register(key, Kind::Duration, default.map(ConfigValue::Duration));
    }

    pub fn add_list(&mut self, key: &str) {
        self.register(key, Kind::List, None);
    }

    fn register(&mut self, key: &str, kind: Kind, default: Option<ConfigValue>) {
        self.keys.insert(key.to_string(), KeySpec { kind, default });
    }

    pub fn load<P: AsRef<Path>>(&mut self, file: P) -> Result<(), PushbackupError> {
        let text = fs::read_to_string(file)?;
        self.parse(text.lines())
    }

    pub fn parse<'a, I>(&mut self, lines: I) -> Result<(), PushbackupError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.values.clear();
        self.section_order.clear();

        // Keys seen before the first section header land in an anonymous
        // section that no lookup ever reads.
        let mut section = String::new();
        for line in lines {
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            if line.trim_start().starts_with('#') {
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].to_string();
                if section != "global" {
                    self.section_order.push(section.clone());
                }
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key, value),
                None => {
                    return Err(PushbackupError::InvalidConfig(format!(
                        "missing value for option {}",
                        line
                    )))
                }
            };
            let spec = self
                .keys
                .get(key)
                .ok_or_else(|| PushbackupError::InvalidConfig(format!("unknown option {}", key)))?;
            let converted = convert(key, value, spec.kind)?;

            let sect = self.values.entry(section.clone()).or_default();
            match (sect.get_mut(key), converted) {
                (Some(ConfigValue::List(old)), ConfigValue::List(new)) => old.extend(new),
                (Some(_), _) => {
                    return Err(PushbackupError::InvalidConfig(format!(
                        "cannot repeat option {}",
                        key
                    )))
                }
                (None, converted) => {
                    sect.insert(key.to_string(), converted);
                }
            }
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Option<&ConfigValue>, PushbackupError> {
        let spec = self
            .keys
            .get(key)
            .ok_or_else(|| PushbackupError::InvalidConfig(format!("unknown config key {}", key)))?;
        for section in [self.space_section.as_str(), self.host.as_str(), "global"] {
            if let Some(value) = self.values.get(section).and_then(|s| s.get(key)) {
                return Ok(Some(value));
            }
        }
        Ok(spec.default.as_ref())
    }

    /// Reads a key from one specific section, without the scoped fallback.
    pub fn get(&self, section: &str, key: &str) -> Result<Option<ConfigValue>, PushbackupError> {
        if !self.keys.contains_key(key) {
            return Err(PushbackupError::InvalidConfig(format!(
                "unknown config key {}",
                key
            )));
        }
        Ok(self.values.get(section).and_then(|s| s.get(key)).cloned())
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>, PushbackupError> {
        match self.lookup(key)? {
            Some(ConfigValue::Str(s)) => Ok(Some(s.clone())),
            None => Ok(None),
            Some(_) => Err(type_error(key, "a string")),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, PushbackupError> {
        match self.lookup(key)? {
            Some(ConfigValue::Int(n)) => Ok(Some(*n)),
            None => Ok(None),
            Some(_) => Err(type_error(key, "an integer")),
        }
    }

    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, PushbackupError> {
        match self.lookup(key)? {
            Some(ConfigValue::Duration(d)) => Ok(Some(*d)),
            None => Ok(None),
            Some(_) => Err(type_error(key, "a duration")),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<Option<Vec<String>>, PushbackupError> {
        match self.lookup(key)? {
            Some(ConfigValue::List(items)) => Ok(Some(items.clone())),
            None => Ok(None),
            Some(_) => Err(type_error(key, "a list")),
        }
    }

    /// All non-global sections seen by the last parse, in declaration order.
    pub fn sections(&self) -> Vec<(String, Option<String>)> {
        self.section_order
            .iter()
            .map(|sect| match sect.split_once(':') {
                Some((host, space)) => (host.to_string(), Some(space.to_string())),
                None => (sect.clone(), None),
            })
            .collect()
    }
}

fn type_error(key: &str, expected: &str) -> PushbackupError {
    PushbackupError::InvalidConfig(format!("config key {} is not {}", key, expected))
}

fn convert(key: &str, value: &str, kind: Kind) -> Result<ConfigValue, PushbackupError> {
    match kind {
        Kind::Str => Ok(ConfigValue::Str(value.to_string())),
        Kind::Int => value.parse().map(ConfigValue::Int).map_err(|_| {
            PushbackupError::InvalidConfig(format!("bad number {} for option {}", value, key))
        }),
        Kind::Duration => parse_duration(value).map(ConfigValue::Duration),
        Kind::List => Ok(ConfigValue::List(vec![value.to_string()])),
    }
}

fn parse_duration(value: &str) -> Result<Duration, PushbackupError> {
    let unit = match value.chars().last() {
        Some(unit) => unit,
        None => {
            return Err(PushbackupError::InvalidConfig(format!(
                "time unit missing in {}",
                value
            )))
        }
    };
    let count: i64 = value[..value.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| PushbackupError::InvalidConfig(format!("bad duration {}", value)))?;
    match unit {
        'w' => Ok(Duration::weeks(count)),
        'd' => Ok(Duration::days(count)),
        'h' => Ok(Duration::hours(count)),
        'm' => Ok(Duration::minutes(count)),
        's' => Ok(Duration::seconds(count)),
        _ => Err(PushbackupError::InvalidConfig(format!(
            "time unit missing in {}",
            value
        ))),
    }
}
