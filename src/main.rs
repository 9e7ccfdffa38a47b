//! `cinescrape` CLI - drive site descriptors from the command line

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cinescrape")]
#[command(about = "Scrape streaming portals through TOML site descriptors")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/cinescrape/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured sites and their capabilities
    Sites,

    /// Show home page sections
    Home {
        /// Site name
        site: String,

        /// Only this section key
        #[arg(short, long)]
        section: Option<String>,

        /// Page number
        #[arg(short, long, default_value = "1")]
        page: u32,
    },

    /// Search a site
    Search {
        /// Site name
        site: String,

        /// Query words
        #[arg(required = true)]
        query: Vec<String>,

        /// Use the site's suggestion endpoint
        #[arg(short, long)]
        quick: bool,
    },

    /// Resolve a title page to metadata and episodes
    Detail {
        /// Site name
        site: String,

        /// Title page URL
        url: String,
    },

    /// Resolve an episode token to streams
    Streams {
        /// Site name
        site: String,

        /// Episode token from `detail`
        token: String,
    },

    /// Repair loose JSON from a file or stdin
    RepairJson {
        /// Input file (stdin when absent)
        file: Option<PathBuf>,
    },

    /// Run a decode plugin on a payload
    Decode {
        /// plain, base64, shift-cipher or provider-codes
        decoder: String,

        /// Encoded payload
        payload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cinescrape=info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Sites => cmd::sites::cmd_sites(config)?,
        Commands::Home { site, section, page } => {
            cmd::browse::cmd_home(config, &site, section.as_deref(), page).await?;
        }
        Commands::Search { site, query, quick } => {
            cmd::browse::cmd_search(config, &site, &query.join(" "), quick).await?;
        }
        Commands::Detail { site, url } => cmd::browse::cmd_detail(config, &site, &url).await?,
        Commands::Streams { site, token } => cmd::browse::cmd_streams(config, &site, &token).await?,
        Commands::RepairJson { file } => cmd::tools::cmd_repair_json(file.as_deref())?,
        Commands::Decode { decoder, payload } => cmd::tools::cmd_decode(&decoder, &payload)?,
    }

    Ok(())
}
