// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

use std::path::PathBuf;
use structopt::StructOpt;

/// Rsync backup server with hardlink-based, space-efficient versioning.
///
/// Meant to run as an SSH forced command: sshd puts the rsync invocation the
/// remote host asked for into SSH_ORIGINAL_COMMAND, and the forced command
/// line names the host the key belongs to.
#[derive(Debug, StructOpt)]
pub struct CliArgs {
    #[structopt(short, long)]
    pub verbose: bool,

    /// Resolve everything but don't run rsync or touch the generations.
    #[structopt(short = "n", long)]
    pub dry_run: bool,

    /// Append the operational log to this file (absolute path).
    #[structopt(short = "l", long, parse(from_os_str))]
    pub log: Option<PathBuf>,

    /// Path to the config file.
    #[structopt(short, long, parse(from_os_str), default_value = "pushbackup.conf")]
    pub config: PathBuf,

    /// Name of the remote host, as defined in the config file.
    pub host: String,

    /// The rsync server invocation, normally taken from sshd.
    #[structopt(env = "SSH_ORIGINAL_COMMAND")]
    pub original_cmd: Option<String>,
}
