use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

/// Change-detection poller for snap packages built from GitHub repositories
#[derive(Parser, Debug)]
#[command(
    name = "snappoll",
    about = "Change-detection poller for snap packages built from GitHub repositories",
    version,
    author,
    long_about = "snappoll watches a directory of tracked GitHub repositories and requests a \
                  build for every project whose own repository, or any GitHub repository its \
                  snapcraft.yaml pulls parts from, changed since the last poll. GitHub settings \
                  come from GITHUB_API_ENDPOINT, GITHUB_AUTH_CLIENT_TOKEN and \
                  GITHUB_REPOSITORY_PREFIX."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Poll tracked repositories and request builds for changed ones",
        long_about = "Reads the tracked repositories from a YAML directory file, checks each \
                      eligible project for changes since its last poll and requests builds. \
                      Runs on an interval until interrupted unless --once is given.\n\n\
                      Examples:\n  \
                      snappoll poll --directory repositories.yaml --once\n  \
                      snappoll poll --directory repositories.yaml --interval 600\n  \
                      snappoll poll --directory repositories.yaml --build-command ./request-build.sh"
    )]
    Poll(PollArgs),

    #[command(
        about = "Check whether one project needs a build",
        long_about = "Runs the change check for a single project and prints NEEDSBUILD or \
                      UNCHANGED.\n\n\
                      Examples:\n  \
                      snappoll check anowner aname --since 1501762400000\n  \
                      snappoll check anowner aname --since 2017-08-03T12:13:20Z"
    )]
    Check(CheckArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct PollArgs {
    #[arg(
        short = 'd',
        long,
        value_name = "FILE",
        help = "YAML file listing the tracked repositories"
    )]
    pub directory: PathBuf,

    #[arg(long, help = "Run a single cycle and exit")]
    pub once: bool,

    #[arg(
        short = 'i',
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between cycles (overrides SNAPPOLL_POLL_INTERVAL)"
    )]
    pub interval: Option<u64>,

    #[arg(
        short = 'c',
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Projects checked at once (overrides SNAPPOLL_CONCURRENCY)"
    )]
    pub concurrency: Option<u64>,

    #[arg(
        long,
        value_name = "CMD",
        help = "Shell command run per build request; without it builds are only logged"
    )]
    pub build_command: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[arg(value_name = "OWNER", help = "Repository owner")]
    pub owner: String,

    #[arg(value_name = "NAME", help = "Repository name")]
    pub name: String,

    #[arg(
        long,
        value_name = "WATERMARK",
        help = "Last poll time: epoch milliseconds, RFC 3339 or HTTP date"
    )]
    pub since: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_poll_args() {
        let args = CliArgs::parse_from(["snappoll", "poll", "--directory", "repos.yaml"]);
        match args.command {
            Commands::Poll(poll_args) => {
                assert_eq!(poll_args.directory, PathBuf::from("repos.yaml"));
                assert!(!poll_args.once);
                assert!(poll_args.interval.is_none());
                assert!(poll_args.concurrency.is_none());
                assert!(poll_args.build_command.is_none());
            }
            _ => panic!("Expected Poll command"),
        }
    }

    #[test]
    fn test_poll_with_options() {
        let args = CliArgs::parse_from([
            "snappoll",
            "poll",
            "-d",
            "repos.yaml",
            "--once",
            "--interval",
            "60",
            "--concurrency",
            "2",
            "--build-command",
            "true",
        ]);
        match args.command {
            Commands::Poll(poll_args) => {
                assert!(poll_args.once);
                assert_eq!(poll_args.interval, Some(60));
                assert_eq!(poll_args.concurrency, Some(2));
                assert_eq!(poll_args.build_command.as_deref(), Some("true"));
            }
            _ => panic!("Expected Poll command"),
        }
    }

    #[test]
    fn test_poll_requires_directory() {
        assert!(CliArgs::try_parse_from(["snappoll", "poll"]).is_err());
    }

    #[test]
    fn test_poll_rejects_zero_interval() {
        assert!(CliArgs::try_parse_from(["snappoll", "poll", "-d", "r.yaml", "--interval", "0"]).is_err());
    }

    #[test]
    fn test_check_command() {
        let args = CliArgs::parse_from(["snappoll", "check", "anowner", "aname", "--since", "1501762400000"]);
        match args.command {
            Commands::Check(check_args) => {
                assert_eq!(check_args.owner, "anowner");
                assert_eq!(check_args.name, "aname");
                assert_eq!(check_args.since, "1501762400000");
            }
            _ => panic!("Expected Check command"),
        }
    }

    #[test]
    fn test_check_requires_since() {
        assert!(CliArgs::try_parse_from(["snappoll", "check", "anowner", "aname"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["snappoll", "-v", "check", "o", "n", "--since", "0"]);
        assert!(args.verbose);

        let args = CliArgs::parse_from(["snappoll", "--log-level", "debug", "check", "o", "n", "--since", "0"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        assert!(CliArgs::try_parse_from(["snappoll", "-v", "-q", "check", "o", "n", "--since", "0"]).is_err());
    }
}
