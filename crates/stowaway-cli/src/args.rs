//! CLI argument definitions using clap derive

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use stowaway_core::BACKGROUND_SYNC_TAG;

/// stowaway - offline caching intermediary
///
/// Keeps a versioned local copy of an application's resources, answers
/// requests cache-first, and serves an offline page when a navigation can
/// be satisfied by neither the cache nor the network.
#[derive(Parser, Debug)]
#[command(name = "stowaway")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STOWAWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Version tag of the deployment (overrides config and STOWAWAY_VERSION)
    #[arg(long, global = true)]
    pub version_tag: Option<String>,

    /// Application origin (overrides config and STOWAWAY_ORIGIN)
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Directory holding the versioned stores
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install the current version: precache the manifest, then activate
    Install(InstallArgs),

    /// Activate the current version and delete every other store
    Activate,

    /// Send a request through the worker and print the response body
    Fetch(FetchArgs),

    /// Fire a background sync event
    Sync(SyncArgs),

    /// Deliver a push message
    Push(PushArgs),

    /// Simulate a click on a notification
    Click(ClickArgs),

    /// Show stores, lifecycle state and queued retries
    Status,

    /// List requests waiting for background sync
    Queue,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Stop after install; leave activation to a later `activate`
    #[arg(long)]
    pub no_activate: bool,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Absolute URL, or a path resolved against the origin
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Treat the request as a full-document navigation
    #[arg(long)]
    pub navigate: bool,

    /// Request destination (script, style, image, font)
    #[arg(long, conflicts_with = "navigate")]
    pub destination: Option<String>,

    /// Request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// Extra request header, `Name: value`
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Queue a failed non-GET request for background sync
    #[arg(long)]
    pub queue_on_failure: bool,

    /// Print status line and headers to stderr
    #[arg(short, long)]
    pub include: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Sync tag to fire
    #[arg(long, default_value = BACKGROUND_SYNC_TAG)]
    pub tag: String,
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Push data, expected to be JSON `{"title": ..., "body": ...}`
    pub payload: Option<String>,
}

#[derive(Args, Debug)]
pub struct ClickArgs {
    /// Title of the clicked notification
    #[arg(long, default_value = "")]
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_about_comes_from_doc_comment() {
        use clap::CommandFactory;
        let about = Cli::command()
            .get_about()
            .map(|a| a.to_string())
            .unwrap_or_default();
        assert!(about.contains("offline caching intermediary"), "about was {:?}", about);
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::parse_from([
            "stowaway",
            "fetch",
            "/api/items",
            "-X",
            "POST",
            "-d",
            "a=1",
            "-H",
            "Content-Type: application/x-www-form-urlencoded",
            "--queue-on-failure",
        ]);
        match cli.command {
            Commands::Fetch(args) => {
                assert_eq!(args.url, "/api/items");
                assert_eq!(args.method, "POST");
                assert_eq!(args.data.as_deref(), Some("a=1"));
                assert_eq!(args.headers.len(), 1);
                assert!(args.queue_on_failure);
                assert!(!args.navigate);
            }
            other => panic!("expected fetch, got {:?}", other),
        }
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::parse_from([
            "stowaway",
            "status",
            "--version-tag",
            "v2",
            "--cache-dir",
            "/tmp/stores",
            "-vv",
        ]);
        assert_eq!(cli.version_tag.as_deref(), Some("v2"));
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/stores")));
        assert_eq!(cli.verbose, 2);
    }
}
