use std::path::PathBuf;

use clap::Parser;

use crate::logging::Verbosity;

/// campusd - data sidecar for the campus console and student mall
///
/// Reads one JSON request per line on stdin and answers on stdout.
#[derive(Debug, Parser)]
#[command(name = "campusd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Open this workspace directory before reading requests
    #[arg(short, long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log errors only
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_workspace_and_verbosity() {
        let cli = Cli::try_parse_from(["campusd", "--workspace", "/tmp/ws", "-vv"]).expect("parse");
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cli.verbosity(), Verbosity::Trace);

        let cli = Cli::try_parse_from(["campusd", "-q"]).expect("parse");
        assert_eq!(cli.workspace, None);
        assert_eq!(cli.verbosity(), Verbosity::Quiet);

        let cli = Cli::try_parse_from(["campusd"]).expect("parse");
        assert_eq!(cli.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["campusd", "-q", "-v"]).is_err());
    }
}
