use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use offcache::cache::{Destination, NamespaceName, Registry, Request, SqliteRegistry};
use offcache::net::{Fetcher, HttpFetcher};
use offcache::{
  logging, CacheError, Config, ControlChannel, ControlMessage, Dispatcher, Lifecycle,
};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Versioned offline request cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Deployed version to use instead of the one in the config file
  #[arg(long)]
  version_override: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate the configured version
  Install {
    /// Refetch the manifest even if this version is already active
    #[arg(long)]
    reinstall: bool,
  },
  /// Resolve one request through the active version; the body goes to stdout
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    document: bool,
  },
  /// Deliver a control message, e.g. '{"kind":"clear-all"}'
  Message { json: String },
  /// Show the active version and registry contents
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override version if specified on command line
  if let Some(version) = args.version_override {
    config.cache.version = version;
    config.cache.validate()?;
  }

  let _log_guard = logging::init(&config.log)?;

  let registry: Arc<dyn Registry> = Arc::new(SqliteRegistry::open(config.database.as_deref())?);
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.fetch_timeout())?);
  let lifecycle = Arc::new(Lifecycle::new(registry.clone(), fetcher));

  match args.command {
    Command::Install { reinstall } => {
      let result = if reinstall {
        lifecycle.install(config.cache.clone()).await
      } else {
        lifecycle.start(config.cache.clone()).await
      };
      let state = result?;
      println!("{} {:?}", config.cache.version, state);
    }
    Command::Fetch {
      url,
      method,
      document,
    } => {
      match lifecycle.start(config.cache.clone()).await {
        Ok(state) => info!(version = %config.cache.version, ?state, "ready"),
        Err(err @ CacheError::InstallAborted { .. }) => {
          warn!(error = %err, "continuing with the previous version")
        }
        Err(err) => return Err(err.into()),
      }

      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let url = config
        .cache
        .resolve(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let destination = if document {
        Destination::Document
      } else {
        Destination::Subresource
      };

      let request = Request::new(method, url).with_destination(destination);
      let result = lifecycle.resolve(&request).await?;
      info!(
        status = result.data.status,
        source = ?result.source,
        cached_at = ?result.cached_at,
        "resolved"
      );

      let mut stdout = std::io::stdout().lock();
      stdout.write_all(&result.data.body)?;
      stdout.flush()?;
    }
    Command::Message { json } => {
      let message = ControlMessage::from_json(&json)?;
      // A candidate installed by another process is only known to the registry
      lifecycle.restore(&config.cache).await?;
      let channel = ControlChannel::spawn(Dispatcher::new(lifecycle.clone()));
      channel.send(message).await?;
      println!("{} acknowledged", message.kind());
    }
    Command::Status => {
      let active = registry.active_version().await?;
      let waiting = registry.waiting_version().await?;
      println!(
        "active version: {}",
        active.as_deref().unwrap_or("(none)")
      );
      println!(
        "waiting version: {}",
        waiting.as_deref().unwrap_or("(none)")
      );
      println!("configured version: {}", config.cache.version);
      for name in registry.namespaces().await? {
        let count = registry.entry_count(&name).await?;
        let owner = match NamespaceName::parse(&config.cache.app, &name) {
          Some(parsed) => format!("{} {}", parsed.kind.label(), parsed.version),
          None => "foreign".to_string(),
        };
        println!("  {:<40} {:<20} {:>6} entries", name, owner, count);
      }
    }
  }

  Ok(())
}
