use clap::{Parser, Subcommand};
use nightrelay::ledger::{Marker, Stage, Target};
use nightrelay::night::Night;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nightrelay")]
#[command(about = "Transfer, verify and archive nightly exposure data", long_about = None)]
pub struct Cli {
    /// Configuration file (overrides NIGHTRELAY_CONFIG)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Set log level to DEBUG
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the transfer daemon
    Daemon(DaemonArgs),
    /// Record a stage outcome in the status ledger
    Status(StatusArgs),
    /// Mirror top-level data directories with a pool of rsync processes
    Mirror(MirrorArgs),
    /// Serve status documents over HTTP
    Serve(ServeArgs),
    /// Synchronize nightlog directories in both directions
    Nightlog(NightlogArgs),
}

#[derive(clap::Args, Debug)]
pub struct DaemonArgs {
    /// Exit gracefully when FILE is detected (default $HOME/stop_nightrelay)
    #[arg(short, long, value_name = "FILE")]
    pub kill: Option<PathBuf>,

    /// Observe only: make no filesystem or remote changes
    #[arg(short, long)]
    pub shadow: bool,

    /// Skip tape backups
    #[arg(short = 'B', long)]
    pub no_backup: bool,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Night of observation
    #[arg(value_name = "YYYYMMDD")]
    pub night: Night,

    /// Exposure number, or `all` for every known exposure of the night
    #[arg(value_name = "EXPID")]
    pub expid: Target,

    /// rsync, checksum, backup or pipeline
    pub stage: Stage,

    /// Indicate that the stage failed
    #[arg(short, long)]
    pub failure: bool,

    /// Indicate that a set of exposures (flats, arcs, science) is complete
    #[arg(short, long, value_name = "MARKER")]
    pub last: Option<Marker>,

    /// Status directory (defaults to the first configured directory's)
    #[arg(long, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct MirrorArgs {
    /// Also sync static data sets
    #[arg(short, long = "static")]
    pub include_static: bool,

    /// Exclude DIR from sync; may be repeated
    #[arg(short, long, value_name = "DIR", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Pass --checksum to rsync
    #[arg(short = 'C', long)]
    pub checksum: bool,

    /// Use DIR as destination directory
    #[arg(short = 'D', long, value_name = "DIR")]
    pub destination: Option<PathBuf>,

    /// Print the planned commands without running them
    #[arg(short = 't', long)]
    pub dry_run: bool,
}

#[derive(clap::Args, Debug)]
pub struct NightlogArgs {
    /// Exit gracefully when FILE is detected (default $HOME/stop_nightrelay)
    #[arg(short, long, value_name = "FILE")]
    pub kill: Option<PathBuf>,

    /// Do not run the permission-fixup tool
    #[arg(short = 'P', long)]
    pub no_permission: bool,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub address: SocketAddr,

    /// Status directory (defaults to the first configured directory's)
    #[arg(long, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nightrelay::night::Exposure;

    #[test]
    fn test_status_args() {
        let cli = Cli::try_parse_from([
            "nightrelay", "status", "20231031", "127", "pipeline", "--last", "science",
        ])
        .unwrap();
        let Commands::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.night.as_str(), "20231031");
        assert_eq!(args.expid, Target::Exposure(Exposure::new(127)));
        assert_eq!(args.stage, Stage::Pipeline);
        assert_eq!(args.last, Some(Marker::Science));
        assert!(!args.failure);
    }

    #[test]
    fn test_status_rejects_bad_night() {
        assert!(Cli::try_parse_from(["nightrelay", "status", "2023103", "all", "backup"]).is_err());
    }

    #[test]
    fn test_daemon_args() {
        let cli =
            Cli::try_parse_from(["nightrelay", "--debug", "daemon", "--shadow", "--once"]).unwrap();
        assert!(cli.debug);
        let Commands::Daemon(args) = cli.command else {
            panic!("expected daemon");
        };
        assert!(args.shadow && args.once && !args.no_backup);
    }

    #[test]
    fn test_mirror_args() {
        let cli = Cli::try_parse_from([
            "nightrelay", "mirror", "--static", "--exclude", "cmx", "sv1",
        ])
        .unwrap();
        let Commands::Mirror(args) = cli.command else {
            panic!("expected mirror");
        };
        assert!(args.include_static);
        assert_eq!(args.exclude, vec!["cmx", "sv1"]);
    }

    #[test]
    fn test_nightlog_args() {
        let cli = Cli::try_parse_from(["nightrelay", "nightlog", "-P", "--kill", "/tmp/stop"]).unwrap();
        let Commands::Nightlog(args) = cli.command else {
            panic!("expected nightlog");
        };
        assert!(args.no_permission && !args.once);
        assert_eq!(args.kill, Some(PathBuf::from("/tmp/stop")));
    }
}
