// crates/hook/src/cli.rs
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "nous")]
#[command(about = "Distills Claude Code sessions into learnings and project knowledge", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Handle one hook event read from stdin (the default)
    Hook,

    /// Drain both inboxes of a project into their stores now
    Flush {
        /// Project root (the session's cwd)
        #[arg(long)]
        project: PathBuf,
    },

    /// Print a session's current context usage percentage
    Usage {
        /// Project root as recorded by the statusline
        #[arg(long)]
        project: String,

        /// Session id
        #[arg(long)]
        session: String,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Hook)
    }
}

/// Outcome of reading argv.
#[derive(Debug)]
pub enum Invocation {
    Run(Command),
    /// `--help` or `--version`: print and exit.
    Info(clap::Error),
    /// Unusable argv. The payload on stdin is still handled as a hook event.
    Fallback(clap::Error),
}

impl Invocation {
    pub fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        match Cli::try_parse_from(args) {
            Ok(cli) => Self::Run(cli.command()),
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => Self::Info(e),
            Err(e) => Self::Fallback(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_hook() {
        let cli = Cli::try_parse_from(["nous"]).unwrap();
        assert!(matches!(cli.command(), Command::Hook));
    }

    #[test]
    fn test_flush_requires_project() {
        assert!(Cli::try_parse_from(["nous", "flush"]).is_err());
        let cli = Cli::try_parse_from(["nous", "flush", "--project", "/work/p"]).unwrap();
        assert!(matches!(cli.command(), Command::Flush { project } if project == PathBuf::from("/work/p")));
    }

    #[test]
    fn test_bad_argv_falls_back_to_hook() {
        for argv in [&["nous", "--bogus"][..], &["nous", "frobnicate"], &["nous", "usage", "--project", "/p"]] {
            match Invocation::from_args(argv.iter().copied()) {
                Invocation::Fallback(e) => assert!(!e.to_string().is_empty()),
                other => panic!("{argv:?} gave {other:?}"),
            }
        }
        assert!(matches!(Invocation::from_args(["nous", "--help"]), Invocation::Info(_)));
        assert!(matches!(Invocation::from_args(["nous", "hook"]), Invocation::Run(Command::Hook)));
    }

    #[test]
    fn test_usage_args() {
        let cli = Cli::try_parse_from(["nous", "usage", "--project", "/p", "--session", "s1"]).unwrap();
        match cli.command() {
            Command::Usage { project, session } => {
                assert_eq!(project, "/p");
                assert_eq!(session, "s1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
