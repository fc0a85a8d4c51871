//! Command-line interface definitions.
//!
//! Every subcommand shares the global `--config` option, which can also be
//! supplied through `BLOG_HARVESTER_CONFIG`.

use clap::{Args, Parser, Subcommand};

/// Harvests posts from platform blogs through their RSS feeds.
///
/// # Examples
///
/// ```sh
/// # Serve the HTTP API
/// blog_harvester --config harvester.yaml serve --bind 0.0.0.0:3000
///
/// # Harvest one blog since February, keeping posts about sales or launches
/// blog_harvester harvest --source https://blog.naver.com/some_handle -k sale -k launch --since 2024-02-01
///
/// # Harvest every configured source and write JSON reports
/// blog_harvester harvest -j ./json
///
/// # Print the body of a single post
/// blog_harvester fetch https://blog.naver.com/some_handle/223000000000
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, global = true, env = "BLOG_HARVESTER_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API
    Serve {
        /// Listen address; overrides `server.bind` from the config
        #[arg(long)]
        bind: Option<String>,
    },
    /// Harvest one or more blogs
    Harvest(HarvestArgs),
    /// Retrieve the body of a single post
    Fetch {
        /// Post URL in any supported shape
        post_url: String,
    },
}

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Blog URL to harvest; repeatable. Defaults to the configured sources
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Keep only posts whose title contains one of these (case-insensitive)
    #[arg(short, long = "keyword")]
    pub keywords: Vec<String>,

    /// Earliest publish date to keep, `YYYY-MM-DD`
    #[arg(long)]
    pub since: Option<String>,

    /// Print progress as server-sent-event frames on stdout
    #[arg(long)]
    pub stream: bool,

    /// Output directory for per-source JSON reports
    #[arg(short, long)]
    pub json_output_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_parsing() {
        let cli = Cli::parse_from([
            "blog_harvester",
            "harvest",
            "--source",
            "https://blog.naver.com/one",
            "--source",
            "https://blog.naver.com/two",
            "-k",
            "sale",
            "--keyword",
            "launch",
            "--since",
            "2024-02-01",
            "-j",
            "/tmp/json",
        ]);

        let Command::Harvest(args) = cli.command else {
            panic!("expected harvest");
        };
        assert_eq!(args.sources.len(), 2);
        assert_eq!(args.keywords, vec!["sale", "launch"]);
        assert_eq!(args.since.as_deref(), Some("2024-02-01"));
        assert_eq!(args.json_output_dir.as_deref(), Some("/tmp/json"));
        assert!(!args.stream);
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::parse_from(["blog_harvester", "serve", "--bind", "0.0.0.0:8080", "-c", "h.yaml"]);
        assert_eq!(cli.config.as_deref(), Some("h.yaml"));
        match cli.command {
            Command::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:8080")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fetch_requires_url() {
        assert!(Cli::try_parse_from(["blog_harvester", "fetch"]).is_err());
        let cli = Cli::parse_from(["blog_harvester", "fetch", "https://blog.naver.com/a/1"]);
        assert!(matches!(cli.command, Command::Fetch { .. }));
    }
}
