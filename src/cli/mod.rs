//! Command-line surface of the `jats` server binary.
//!
//! With no action flag the binary serves HTTP. `--reset-password` and
//! `--list-users` run against the database and exit.

mod commands;

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

pub use commands::{cmd_list_users, cmd_reset_password, validate_new_password};

/// JATS - Just Another To-do System
#[derive(Debug, Parser)]
#[command(name = "jats")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Reset a user's password (prompts twice) and exit
    #[arg(long = "reset-password", value_name = "USERNAME", conflicts_with = "list_users")]
    pub reset_password: Option<String>,

    /// Print every user as a table and exit
    #[arg(long = "list-users")]
    pub list_users: bool,
}

impl Cli {
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

const LONG_FLAGS: [&str; 3] = ["config", "reset-password", "list-users"];

/// Rewrite `-reset-password` style flags to their `--` form.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(s) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = s.strip_prefix('-').filter(|r| !r.starts_with('-')) else {
                return arg;
            };
            let name = rest.split('=').next().unwrap_or(rest);
            if LONG_FLAGS.contains(&name) {
                OsString::from(format!("-{s}"))
            } else {
                arg
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_args(args.iter().map(OsString::from))).unwrap()
    }

    #[test]
    fn single_dash_aliases() {
        let cli = parse(&["jats", "-config", "/etc/jats.toml", "-list-users"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/jats.toml")));
        assert!(cli.list_users);

        let cli = parse(&["jats", "-reset-password=alice"]);
        assert_eq!(cli.reset_password.as_deref(), Some("alice"));
    }

    #[test]
    fn standard_forms_still_work() {
        let cli = parse(&["jats", "-c", "a.toml", "--reset-password", "bob"]);
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        assert_eq!(cli.reset_password.as_deref(), Some("bob"));
        assert!(!cli.list_users);

        let cli = parse(&["jats"]);
        assert!(cli.config.is_none() && cli.reset_password.is_none() && !cli.list_users);
    }

    #[test]
    fn short_flag_values_are_untouched() {
        let args = normalize_args(["jats", "-c", "-config.toml"].map(OsString::from));
        assert_eq!(args[2], OsString::from("-config.toml"));
    }

    #[test]
    fn actions_conflict() {
        let args = normalize_args(["jats", "--list-users", "--reset-password", "x"].map(OsString::from));
        assert!(Cli::try_parse_from(args).is_err());
    }
}
