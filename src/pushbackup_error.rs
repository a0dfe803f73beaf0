// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

use std::error;
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Debug)]
pub enum PushbackupError {
    IoError(io::Error),
    InvalidCommand(String),
    InvalidConfig(String),
    MissingDir(PathBuf),
    InvalidPath(PathBuf),
    NoSuchBackup(String),
    CommandFailed(PathBuf, process::ExitStatus),
}

impl Display for PushbackupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PushbackupError::IoError(e) => write!(f, "{}", e),
            PushbackupError::InvalidCommand(s) => write!(f, "{}", s),
            PushbackupError::InvalidConfig(s) => write!(f, "{}", s),
            PushbackupError::MissingDir(d) => write!(f, "{} is not a directory", d.display()),
            PushbackupError::InvalidPath(d) => write!(f, "{} is not a valid path", d.display()),
            PushbackupError::NoSuchBackup(s) => write!(f, "{}", s),
            PushbackupError::CommandFailed(c, s) => write!(
                f,
                "{} failed with exit status {}",
                c.display(),
                s.code().unwrap_or(-1)
            ),
        }
    }
}

impl error::Error for PushbackupError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            PushbackupError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PushbackupError {
    fn from(e: io::Error) -> Self {
        PushbackupError::IoError(e)
    }
}
