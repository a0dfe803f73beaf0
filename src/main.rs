// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

mod args;
mod config;
mod generations;
mod policy;
mod pushbackup_error;
mod rsync_command;
mod server;

use log::error;
use std::fs;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::process;
use structopt::StructOpt;

fn init_logging(verbose: bool, log: Option<PathBuf>) -> Result<(), fern::InitError> {
    let file_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logging = fern::Dispatch::new().level(file_level);

    // stdout carries the rsync protocol stream back to the client, so
    // console output goes to stderr and stays limited to real problems.
    let stderr_log = fern::Dispatch::new()
        .format(|out, message, _| {
            out.finish(format_args!(
                "{} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                message
            ))
        })
        .level(log::LevelFilter::Warn)
        .chain(io::stderr());

    let mut file_log = fern::Dispatch::new();
    if let Some(log) = log {
        if !log.is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "--log must be an absolute path",
            )
            .into());
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .custom_flags(libc::O_NOFOLLOW)
            .open(log)?;
        file_log = file_log
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{}] [{}] [{}] {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .chain(file);
    }

    logging.chain(file_log).chain(stderr_log).apply()?;

    Ok(())
}

fn main() {
    let args = args::CliArgs::from_args();

    init_logging(args.verbose, args.log.clone()).unwrap_or_else(|e| {
        eprintln!("Failed to set up logging: {}", e);
        process::exit(1);
    });

    match server::run(&args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
