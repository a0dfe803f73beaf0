// Copyright 2021 Benjamin Gordon
// SPDX-License-Identifier: GPL-2.0-or-later

//! Server side of a push backup: vets the rsync invocation the remote host
//! asked sshd to run, picks or creates the backup generation, and re-invokes
//! rsync with the sanitized arguments.

use crate::args::CliArgs;
use crate::config::ConfigParser;
use crate::generations::GenerationDir;
use crate::policy::{Action, Mode, Policy};
use crate::pushbackup_error::PushbackupError;
use crate::rsync_command::RsyncCommand;
use chrono::{Duration, Local};
use itertools::Itertools;
use log::{debug, info};
use pathsearch::find_executable_in_path;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

/// The option policy for the four server modes.
fn build_policy() -> Policy {
    use Action::{Allow, Deny, Discourage, Recommend, Require};

    let mut cmd = Policy::new();

    // Without --one-file-system a backup usually ends up crawling /proc or
    // /sys.  Restore must allow skipping it for destinations that are
    // mountpoints now but weren't during backup.
    cmd.add(
        &[
            ("backup verify", Require, Some("avoids backing up /proc or /sys")),
            ("restore list", Allow, None),
        ],
        &["-x --one-file-system"],
        None,
    );
    // Checksums are pointless against an empty destination but make
    // verification thorough.
    cmd.add(
        &[
            ("backup restore", Discourage, Some("slows down transfers")),
            ("list", Allow, None),
            ("verify", Recommend, Some("more thorough verification")),
        ],
        &["-c --checksum"],
        None,
    );
    // --itemize-changes actually sets --log-format.
    cmd.add(
        &[
            ("verify", Recommend, Some("to see the differences")),
            ("backup restore list", Allow, None),
        ],
        &["-i --itemize-changes", "--log-format="],
        Some("-i --itemize-changes"),
    );

    // Options the server sets itself, so the client must not.
    cmd.deny(
        &["--compare-dest=", "--copy-dest=", "--link-dest="],
        Some("backups always use --link-dest"),
    );
    cmd.deny(
        &["--partial", "--partial-dir="],
        Some("this option is always set server-side"),
    );
    cmd.deny(
        &["--fake-super", "--super", "--max-alloc="],
        Some("this option is configured server-side"),
    );

    // Options required for a complete backup or restore.  They are
    // meaningless for listing, and meaningless implies harmless.
    cmd.add(
        &[("backup restore verify", Require, None), ("list", Allow, None)],
        &["-r", "-l", "-p", "-t", "-g", "-o", "-D"],
        Some("-a --archive"),
    );
    cmd.add(
        &[
            ("backup restore verify", Require, Some("local usernames are meaningless on the server")),
            ("list", Allow, None),
        ],
        &["--numeric-ids"],
        None,
    );
    cmd.add(
        &[
            ("backup verify", Require, Some("works even if locally unsupported")),
            ("list", Allow, None),
            ("restore", Recommend, Some("if locally supported")),
        ],
        &["-H --hard-links", "-A --acls", "-X --xattrs"],
        Some("-HAX"),
    );
    // Backups need specifically --delete-delay: the other --delete variants
    // run out of memory under --fuzzy --inc-recursive.
    cmd.deny(
        &["--delete", "--delete-after", "--delete-before", "--delete-during", "--delete-excluded"],
        Some("use --delete-delay"),
    );
    cmd.add(
        &[
            ("restore list", Deny, Some("how did you even get your rsync to send that option?")),
            ("backup verify", Require, Some("avoids zombie files")),
        ],
        &["--delete-delay", "--delete-excluded"],
        None,
    );
    cmd.allow(&["-N --crtimes", "-U --atimes", "--open-noatime"], None);

    // Options that quietly leave things out of the backup.  On restore a
    // partial copy can be intentional, so only discourage them there.
    cmd.add(
        &[
            ("backup verify", Deny, Some("backup will be incomplete")),
            ("restore", Discourage, Some("restore may be incomplete")),
            ("list", Allow, None),
        ],
        &[
            "-d --dirs",
            "-m --prune-empty-dirs",
            "-J --omit-link-times",
            "-O --omit-dir-times",
            "--ignore-existing",
            "--max-delete=",
            "--max-size=",
            "--min-size=",
        ],
        None,
    );
    // Anything that dereferences symlinks can wreck a restored system.
    cmd.deny(
        &["-L --copy-links", "-k --copy-dirlinks", "--copy-unsafe-links", "--safe-links"],
        Some("destroys symlinks"),
    );
    cmd.discourage(&["-C --cvs-exclude"], Some("backup / restore might be incomplete"));
    cmd.deny(&["--iconv="], Some("will likely mangle your filenames"));

    // Unsupported options, and options that make no sense against backup
    // storage.
    cmd.deny(&["--ignore-errors"], Some("when has that ever been a good idea?"));
    cmd.deny(&["-W --whole-file"], Some("slows down transfers"));
    cmd.deny(
        &["-s --protect-args", "-@ --modify-window=", "-B --block-size="],
        Some("not supported by backup system"),
    );
    cmd.deny(
        &[
            "-R --relative",
            "-b --backup",
            "-u --update",
            "--append",
            "--backup-dir",
            "--delay-updates",
            "--existing",
            "--inplace",
            "--remove-source-files",
            "--groupmap=",
            "--usermap=",
            "--mkpath",
            "--preallocate",
            "--suffix=",
            "--size-only",
        ],
        Some("does not make sense for backup storage"),
    );
    // Most of these allow arbitrary file reads, some arbitrary writes.
    cmd.deny(
        &[
            "-K --keep-dirlinks",
            "--daemon",
            "--files-from=",
            "--write-devices",
            "--log-file=",
            "--only-write-batch=",
            "--temp-dir=",
        ],
        Some("please do not hack the server"),
    );
    cmd.deny(
        &["-E --executability", "-I --ignore-times", "--force", "--from0", "--no-implied-dirs"],
        Some("rsync should never have sent that option for a proper invocation"),
    );
    cmd.deny(
        &["--delete-missing-args", "--ignore-missing-args"],
        Some("fix your commandline instead"),
    );
    cmd.discourage(&["--timeout="], Some("use the SSH timeout instead"));

    // Performance and bandwidth trade-offs the client may pick freely.
    cmd.allow(
        &[
            "-z --compress",
            "-y --fuzzy",
            "-S --sparse",
            "--bwlimit",
            "--checksum-choice=",
            "--checksum-seed=",
            "--compress-choice=",
            "--compress-level=",
            "--old-compress",
            "--new-compress",
            "--skip-compress=",
        ],
        Some("client-controlled trade-off"),
    );
    cmd.allow(
        &["--stats", "--debug=", "--info=", "--no-msgs2stderr", "--msgs2stderr"],
        Some("informational outputs"),
    );

    cmd
}

/// Splits the rsync path argument into `(space, time, subpath)`.  The token
/// has the shape `space[@time][/subpath]`; `.` and the empty string name the
/// default space, and `@latest` means the same as no time selector.
fn split_backup_path(path: &str) -> (String, Option<String>, String) {
    let (head, subpath) = match path.split_once('/') {
        Some((head, rest)) => (head, format!("/{}", rest)),
        None => (path, String::from("/")),
    };
    let (space, time) = match head.split_once('@') {
        Some((space, time)) => (space, Some(format!("@{}", time))),
        None => (head, None),
    };
    let time = time.filter(|time| time != "@latest");
    let space = if space.is_empty() || space == "." {
        "default"
    } else {
        space
    };
    (space.to_string(), time, subpath)
}

/// The space and subpath come straight from the remote peer; a `..` in
/// either would escape the per-host target directory.
fn has_parent_references(space: &str, subpath: &str) -> bool {
    space == ".." || subpath.split('/').any(|part| part == "..")
}

/// keep-count and keep-duration default to each other's neutral value when
/// only one of them is configured; with neither set the count cap is
/// effectively infinite.
fn effective_retention(count: Option<i64>, duration: Option<Duration>) -> (i64, Duration) {
    match (count, duration) {
        (None, None) => (1_000_000, Duration::seconds(0)),
        (Some(count), None) => (count, Duration::seconds(0)),
        (None, Some(duration)) => (1, duration),
        (Some(count), Some(duration)) => (count, duration),
    }
}

/// Picks the generation a restore or verify runs against.  A time selector
/// matches by prefix; several matches select the oldest one.  The second
/// element reports whether the match was ambiguous.
fn choose_generation(
    generations: &[String],
    time: Option<&str>,
) -> Result<(String, bool), PushbackupError> {
    match time {
        Some(time) => {
            let matches: Vec<&String> = generations
                .iter()
                .filter(|name| name.starts_with(time))
                .collect();
            match matches.first() {
                Some(first) => Ok(((*first).clone(), matches.len() > 1)),
                None => Err(PushbackupError::NoSuchBackup(format!(
                    "no backup matching {}",
                    time
                ))),
            }
        }
        None => match generations.last() {
            Some(latest) => Ok((latest.clone(), false)),
            None => Err(PushbackupError::NoSuchBackup(String::from(
                "no backups exist yet",
            ))),
        },
    }
}

/// Sources for a listing, relative to the target directory.  With a time
/// selector and no subpath, every matching generation becomes its own
/// source; with a subpath the match must be unique.
fn list_sources(
    generations: &[String],
    time: Option<&str>,
    subpath: &str,
) -> Result<Vec<String>, PushbackupError> {
    match time {
        Some(time) => {
            let matches: Vec<&String> = generations
                .iter()
                .filter(|name| name.starts_with(time))
                .collect();
            if matches.is_empty() {
                Err(PushbackupError::NoSuchBackup(format!(
                    "no backup matching {}",
                    time
                )))
            } else if subpath == "/" {
                Ok(matches.into_iter().cloned().collect())
            } else if matches.len() > 1 {
                Err(PushbackupError::NoSuchBackup(format!(
                    "{} backups match {}, pick one to list {}",
                    matches.len(),
                    time,
                    subpath
                )))
            } else {
                Ok(vec![format!("{}{}", matches[0], subpath)])
            }
        }
        None => {
            let (latest, _) = choose_generation(generations, None)?;
            Ok(vec![format!("{}{}", latest, subpath)])
        }
    }
}

/// Appends the server-side pieces of the final rsync invocation: link and
/// staging directories for a backup, the selected generation otherwise.
fn assemble_argv(
    cmd: &RsyncCommand,
    mut argv: Vec<String>,
    gens: &GenerationDir,
    time: Option<&str>,
    subpath: &str,
    excludes: &[String],
) -> Result<Vec<String>, PushbackupError> {
    let target = gens.target();
    match cmd.mode() {
        Mode::Backup => {
            if let Some(previous) = gens.latest()? {
                argv.push(format!("--link-dest={}", target.join(previous).display()));
            }
            for pattern in excludes {
                argv.push(format!("--exclude={}", pattern));
            }
            argv.push(String::from("--partial-dir=.rsync-partial"));
            argv.push(String::from("--delete-excluded"));
            argv.push(String::from("."));
            argv.push(gens.temp_dir()?.display().to_string());
        }
        Mode::Restore | Mode::Verify => {
            let (selected, ambiguous) = choose_generation(&gens.generations()?, time)?;
            if (ambiguous && !cmd.is_quiet()) || cmd.is_verbose() {
                eprintln!("INFO selecting backup {}", selected);
            }
            let source = format!("{}{}", target.join(&selected).display(), subpath);
            if cmd.mode() == Mode::Restore
                && !subpath.ends_with('/')
                && Path::new(&source).is_dir()
                && !cmd.is_quiet()
            {
                eprintln!(
                    "WARNING restoring directory {} itself, append / to restore only its contents",
                    subpath
                );
            }
            argv.push(String::from("."));
            argv.push(source);
        }
        Mode::List => {
            argv.push(String::from("."));
            for source in list_sources(&gens.generations()?, time, subpath)? {
                argv.push(target.join(source).display().to_string());
            }
        }
    }
    Ok(argv)
}

fn format_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.contains(' ') {
                format!(r#""{}""#, arg)
            } else {
                arg.to_string()
            }
        })
        .join(" ")
}

fn resolve_target(
    config: &ConfigParser,
    host: &str,
    space: &str,
) -> Result<PathBuf, PushbackupError> {
    let template = config
        .get_str("target")?
        .ok_or_else(|| PushbackupError::InvalidConfig(String::from("target not configured")))?;
    let target = PathBuf::from(template.replace("{HOST}", host).replace("{SPACE}", space));
    // rsync runs with / as its working directory, so a relative target
    // would silently land somewhere surprising.
    if !target.is_absolute() {
        return Err(PushbackupError::InvalidPath(target));
    }
    Ok(target)
}

pub fn run(args: &CliArgs) -> Result<i32, PushbackupError> {
    let cmdline = args.original_cmd.as_deref().ok_or_else(|| {
        PushbackupError::InvalidCommand(String::from(
            "SSH_ORIGINAL_COMMAND not set, is SSH configured correctly?",
        ))
    })?;
    info!("ssh cmd=<{}> host=<{}>", cmdline, args.host);

    let policy = build_policy();
    let cmd = RsyncCommand::parse(&policy, cmdline)?;
    for msg in cmd.messages() {
        eprintln!("{}", msg);
    }
    let (argv, path) = match (cmd.command(), cmd.path()) {
        (Some(argv), Some(path)) => (argv, path),
        _ => return Ok(1),
    };
    info!("mode {} path=<{}>", cmd.mode(), path);

    let (space, time, subpath) = split_backup_path(path);
    if has_parent_references(&space, &subpath) {
        eprintln!("ERROR path {} would leave the backup space", path);
        return Ok(1);
    }
    if cmd.mode() == Mode::Backup && (time.is_some() || subpath != "/") {
        eprintln!("ERROR backups must target a whole space, not {}", path);
        return Ok(1);
    }

    let mut config = ConfigParser::new(&args.host, &space)?;
    config.add_str("target", None);
    config.add_int("keep-count", None);
    config.add_duration("keep-duration", None);
    config.add_duration("backup-cooldown", None);
    config.add_list("exclude");
    config.load(&args.config)?;

    let target = resolve_target(&config, &args.host, &space)?;
    if target.exists() && !target.is_dir() {
        return Err(PushbackupError::MissingDir(target));
    }
    if !target.is_dir() {
        let declared = config
            .sections()
            .iter()
            .any(|(host, sp)| host == &args.host && sp.as_deref() == Some(space.as_str()));
        if !declared {
            eprintln!("ERROR backup space {} not configured for {}", space, args.host);
            return Ok(1);
        }
        fs::create_dir_all(&target)?;
    }

    let gens = GenerationDir::new(&target);
    if cmd.mode() == Mode::Backup {
        if let Some(cooldown) = config.get_duration("backup-cooldown")? {
            // Recognized for operators, not enforced.
            debug!("backup-cooldown {} is configured but not enforced", cooldown);
        }
        if !args.dry_run {
            let (keep_count, keep_duration) = effective_retention(
                config.get_int("keep-count")?,
                config.get_duration("keep-duration")?,
            );
            gens.prune(keep_count, keep_duration, Local::now())?;
        }
    }

    let excludes = config.get_list("exclude")?.unwrap_or_default();
    let argv = assemble_argv(&cmd, argv, &gens, time.as_deref(), &subpath, &excludes)?;

    debug!("final rsync command: {}", format_argv(&argv));
    if args.dry_run {
        info!("dry run, not invoking rsync");
        return Ok(0);
    }

    let rsync = find_executable_in_path("rsync")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Couldn't find rsync in PATH"))?;
    let status = process::Command::new(&rsync)
        .args(&argv[1..])
        .current_dir("/")
        .status()?;
    // 24 is vanished source files, expected when backing up a live system.
    let code = match status.code() {
        Some(0) | Some(24) => 0,
        Some(code) => code,
        None => return Err(PushbackupError::CommandFailed(rsync, status)),
    };
    if code != 0 {
        info!("rsync exited with status {}, keeping temp directory", code);
        return Ok(code);
    }
    if cmd.mode() == Mode::Backup {
        let name = gens.publish(Local::now())?;
        info!("published generation {}", name);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    fn test_policy() -> Policy {
        let mut policy = Policy::new();
        policy.allow(&["-r", "-l", "-p", "-t", "-g", "-o", "-D"], None);
        policy
    }

    fn parsed(cmdline: &str) -> RsyncCommand {
        RsyncCommand::parse(&test_policy(), cmdline).unwrap()
    }

    fn gen_names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn full_policy_accepts_a_proper_backup() {
        let policy = build_policy();
        let cmd = RsyncCommand::parse(
            &policy,
            "rsync --server -logDtprHAXxe.iLsfxC --numeric-ids --delete-delay --delete-excluded . myspace",
        )
        .unwrap();
        assert_eq!(cmd.messages(), [] as [String; 0]);
        assert_eq!(cmd.mode(), Mode::Backup);
        assert!(cmd.command().is_some());
        assert_eq!(cmd.path(), Some("myspace"));
    }

    #[test]
    fn full_policy_flags_an_incomplete_backup() {
        let policy = build_policy();
        let cmd = RsyncCommand::parse(
            &policy,
            "rsync --server -logDtpre.iLsfxC --numeric-ids . myspace",
        )
        .unwrap();
        assert!(cmd.command().is_none());
        let messages = cmd.messages();
        assert!(messages.contains(&"ERROR must use -HAX (works even if locally unsupported)".to_string()));
        assert!(messages
            .contains(&"ERROR must use -x / --one-file-system (avoids backing up /proc or /sys)".to_string()));
        assert!(messages.contains(&"ERROR must use --delete-delay (avoids zombie files)".to_string()));
    }

    #[test]
    fn full_policy_rejects_dangerous_restore_options() {
        let policy = build_policy();
        let cmd = RsyncCommand::parse(
            &policy,
            "rsync --server --sender -logDtprHAXxe.iLsfxC --numeric-ids --files-from=/etc/shadow . space@2021",
        )
        .unwrap();
        assert_eq!(cmd.mode(), Mode::Restore);
        assert_eq!(cmd.command(), None);
        assert!(cmd
            .messages()
            .contains(&"ERROR do not use --files-from= (please do not hack the server)".to_string()));
    }

    #[test]
    fn split_plain_space() {
        assert_eq!(
            split_backup_path("root"),
            ("root".to_string(), None, "/".to_string())
        );
        assert_eq!(
            split_backup_path("root/"),
            ("root".to_string(), None, "/".to_string())
        );
    }

    #[test]
    fn split_default_space_spellings() {
        assert_eq!(
            split_backup_path("."),
            ("default".to_string(), None, "/".to_string())
        );
        assert_eq!(
            split_backup_path(""),
            ("default".to_string(), None, "/".to_string())
        );
        assert_eq!(
            split_backup_path("/"),
            ("default".to_string(), None, "/".to_string())
        );
        assert_eq!(
            split_backup_path("@2011-01-01"),
            ("default".to_string(), Some("@2011-01-01".to_string()), "/".to_string())
        );
    }

    #[test]
    fn split_time_and_subpath() {
        assert_eq!(
            split_backup_path("root@2011-01-01/etc/passwd "),
            (
                "root".to_string(),
                Some("@2011-01-01".to_string()),
                "/etc/passwd ".to_string()
            )
        );
    }

    #[test]
    fn split_latest_is_no_time() {
        assert_eq!(
            split_backup_path("root@latest/etc"),
            ("root".to_string(), None, "/etc".to_string())
        );
    }

    #[test]
    fn split_keeps_strange_characters() {
        assert_eq!(
            split_backup_path("root  and other stuff&/$nothing"),
            (
                "root  and other stuff&".to_string(),
                None,
                "/$nothing".to_string()
            )
        );
    }

    #[test]
    fn parent_references_are_caught() {
        assert!(has_parent_references("..", "/"));
        assert!(has_parent_references("root", "/etc/../../other"));
        assert!(has_parent_references("root", "/.."));
        assert!(!has_parent_references("root", "/etc/passwd"));
        assert!(!has_parent_references("root", "/etc..d/passwd"));
        assert!(!has_parent_references("default", "/"));
    }

    #[test]
    fn retention_defaults() {
        assert_eq!(
            effective_retention(None, None),
            (1_000_000, Duration::seconds(0))
        );
        assert_eq!(
            effective_retention(Some(5), None),
            (5, Duration::seconds(0))
        );
        assert_eq!(
            effective_retention(None, Some(Duration::weeks(2))),
            (1, Duration::weeks(2))
        );
        assert_eq!(
            effective_retention(Some(5), Some(Duration::weeks(2))),
            (5, Duration::weeks(2))
        );
    }

    #[test]
    fn choose_latest_without_time() {
        let gens = gen_names(&["@2021-07-01_00-00-00", "@2021-07-02_00-00-00"]);
        assert_eq!(
            choose_generation(&gens, None).unwrap(),
            ("@2021-07-02_00-00-00".to_string(), false)
        );
        assert!(choose_generation(&[], None).is_err());
    }

    #[test]
    fn choose_oldest_match_with_time() {
        let gens = gen_names(&[
            "@2021-07-01_00-00-00",
            "@2021-07-04_08-00-00",
            "@2021-07-04_20-00-00",
        ]);
        assert_eq!(
            choose_generation(&gens, Some("@2021-07-04")).unwrap(),
            ("@2021-07-04_08-00-00".to_string(), true)
        );
        assert_eq!(
            choose_generation(&gens, Some("@2021-07-01")).unwrap(),
            ("@2021-07-01_00-00-00".to_string(), false)
        );
        assert!(choose_generation(&gens, Some("@2022")).is_err());
    }

    #[test]
    fn list_sources_expand_matches() {
        let gens = gen_names(&[
            "@2021-07-04_08-00-00",
            "@2021-07-04_20-00-00",
            "@2021-08-01_00-00-00",
        ]);
        assert_eq!(
            list_sources(&gens, Some("@2021-07-04"), "/").unwrap(),
            ["@2021-07-04_08-00-00", "@2021-07-04_20-00-00"]
        );
        assert_eq!(
            list_sources(&gens, Some("@2021-08"), "/etc").unwrap(),
            ["@2021-08-01_00-00-00/etc"]
        );
        assert!(list_sources(&gens, Some("@2021-07-04"), "/etc").is_err());
        assert!(list_sources(&gens, Some("@2022"), "/").is_err());
        assert_eq!(
            list_sources(&gens, None, "/etc").unwrap(),
            ["@2021-08-01_00-00-00/etc"]
        );
        assert!(list_sources(&[], None, "/").is_err());
    }

    #[test]
    fn backup_argv_links_against_the_previous_generation() {
        let dir = TempDir::new("target").unwrap();
        fs::create_dir(dir.path().join("@2021-07-01_00-00-00")).unwrap();
        let gens = GenerationDir::new(dir.path());

        let cmd = parsed("rsync --server -rlptgoDe.iLsfxC . space");
        let argv = assemble_argv(
            &cmd,
            cmd.command().unwrap(),
            &gens,
            None,
            "/",
            &["/var/tmp".to_string()],
        )
        .unwrap();

        let tail: Vec<_> = argv[argv.len() - 6..].to_vec();
        assert_eq!(
            tail,
            [
                format!(
                    "--link-dest={}",
                    dir.path().join("@2021-07-01_00-00-00").display()
                ),
                "--exclude=/var/tmp".to_string(),
                "--partial-dir=.rsync-partial".to_string(),
                "--delete-excluded".to_string(),
                ".".to_string(),
                dir.path().join("temp").display().to_string(),
            ]
        );
        assert!(dir.path().join("temp").is_dir());
    }

    #[test]
    fn first_backup_has_no_link_dest() {
        let dir = TempDir::new("target").unwrap();
        let gens = GenerationDir::new(dir.path());

        let cmd = parsed("rsync --server -rlptgoDe.iLsfxC . space");
        let argv = assemble_argv(&cmd, cmd.command().unwrap(), &gens, None, "/", &[]).unwrap();
        assert!(!argv.iter().any(|arg| arg.starts_with("--link-dest=")));
        assert!(!argv.iter().any(|arg| arg.starts_with("--exclude=")));
    }

    #[test]
    fn restore_argv_names_the_selected_generation() {
        let dir = TempDir::new("target").unwrap();
        fs::create_dir(dir.path().join("@2021-07-01_00-00-00")).unwrap();
        fs::create_dir(dir.path().join("@2021-08-01_00-00-00")).unwrap();
        let gens = GenerationDir::new(dir.path());

        let cmd = parsed("rsync --server --sender -rlptgoDe.iLsfxC . space@2021-07/etc");
        let argv = assemble_argv(&cmd, cmd.command().unwrap(), &gens, Some("@2021-07"), "/etc", &[])
            .unwrap();
        assert_eq!(argv[argv.len() - 2], ".");
        assert_eq!(
            argv.last().unwrap(),
            &format!("{}/etc", dir.path().join("@2021-07-01_00-00-00").display())
        );
        // Reading modes never create the staging directory.
        assert!(!dir.path().join("temp").exists());
    }

    #[test]
    fn verify_argv_uses_the_latest_generation() {
        let dir = TempDir::new("target").unwrap();
        fs::create_dir(dir.path().join("@2021-07-01_00-00-00")).unwrap();
        fs::create_dir(dir.path().join("@2021-08-01_00-00-00")).unwrap();
        let gens = GenerationDir::new(dir.path());

        let cmd = parsed("rsync --server --sender -nrlptgoDe.iLsfxC . space");
        assert_eq!(cmd.mode(), Mode::Verify);
        let argv = assemble_argv(&cmd, cmd.command().unwrap(), &gens, None, "/", &[]).unwrap();
        assert_eq!(
            argv.last().unwrap(),
            &format!("{}/", dir.path().join("@2021-08-01_00-00-00").display())
        );
    }

    #[test]
    fn list_argv_expands_matching_generations() {
        let dir = TempDir::new("target").unwrap();
        fs::create_dir(dir.path().join("@2021-07-04_08-00-00")).unwrap();
        fs::create_dir(dir.path().join("@2021-07-04_20-00-00")).unwrap();
        fs::create_dir(dir.path().join("@2021-08-01_00-00-00")).unwrap();
        let gens = GenerationDir::new(dir.path());

        let cmd = parsed("rsync --server --list-only -rlptgoDe.iLsfxC . space@2021-07-04");
        let argv = assemble_argv(&cmd, cmd.command().unwrap(), &gens, Some("@2021-07-04"), "/", &[])
            .unwrap();
        let tail: Vec<_> = argv[argv.len() - 3..].to_vec();
        assert_eq!(
            tail,
            [
                ".".to_string(),
                dir.path().join("@2021-07-04_08-00-00").display().to_string(),
                dir.path().join("@2021-07-04_20-00-00").display().to_string(),
            ]
        );
    }

    #[test]
    fn target_template_substitutes_host_and_space() {
        let mut config = ConfigParser::new("myhost", "root").unwrap();
        config.add_str("target", None);
        config
            .parse(["[global]", "target=/backups/{HOST}/{SPACE}"])
            .unwrap();
        assert_eq!(
            resolve_target(&config, "myhost", "root").unwrap(),
            PathBuf::from("/backups/myhost/root")
        );
    }

    #[test]
    fn relative_target_is_rejected() {
        let mut config = ConfigParser::new("myhost", "root").unwrap();
        config.add_str("target", None);
        config
            .parse(["[global]", "target=backups/{HOST}"])
            .unwrap();
        assert!(matches!(
            resolve_target(&config, "myhost", "root"),
            Err(PushbackupError::InvalidPath(_))
        ));
    }

    #[test]
    fn missing_target_is_a_config_error() {
        let config_with_target_key = {
            let mut config = ConfigParser::new("myhost", "root").unwrap();
            config.add_str("target", None);
            config.parse(["[global]"]).unwrap();
            config
        };
        assert!(resolve_target(&config_with_target_key, "myhost", "root").is_err());
    }

    #[test]
    fn quoted_argv_logging_marks_spaces() {
        let argv = vec!["rsync".to_string(), "--server".to_string(), "a b".to_string()];
        assert_eq!(format_argv(&argv), r#"rsync --server "a b""#);
    }
}
