use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use shopsync::cache::CacheKey;
use shopsync::config::Config;
use shopsync::event::{EventHandler, TouchScript};
use shopsync::invalidation::CACHE_IRRELEVANT;
use shopsync::{DataClient, Payload};

#[derive(Parser, Debug)]
#[command(name = "shopsync")]
#[command(about = "Cached storefront API client with mutation-driven invalidation")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shopsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource twice through the cache
  Get {
    path: String,
    /// Freshness window for this read
    #[arg(long)]
    stale_after_ms: Option<u64>,
  },
  /// Run a state-changing call and show what it invalidated
  Mutate {
    method: String,
    path: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Replay a recorded touch script against a pull-to-refresh surface
  Gesture {
    script: PathBuf,
    /// Resource paths refreshed by the gesture
    #[arg(long = "key")]
    keys: Vec<String>,
    #[arg(long, default_value = "main")]
    surface: String,
  },
  /// List the invalidation table
  Endpoints,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_tracing(&config, args.verbose)?;

  let client = DataClient::from_config(&config)?;
  let result = run(&client, args.command).await;
  client.store().shutdown();
  result
}

fn init_tracing(config: &Config, verbose: bool) -> Result<WorkerGuard> {
  use tracing_subscriber::{fmt, prelude::*, EnvFilter};

  let dir = config.logging.directory()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, "shopsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shopsync=info"));
  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .init();

  Ok(guard)
}

async fn run(client: &DataClient, command: Command) -> Result<()> {
  match command {
    Command::Get {
      path,
      stale_after_ms,
    } => {
      let mut options = client.store().defaults();
      if let Some(ms) = stale_after_ms {
        options = options.stale_after(Duration::from_millis(ms));
      }

      for attempt in 1..=2 {
        let result = client.read(&path, options).await?;
        println!(
          "read #{}: source={:?} fetched_at={}",
          attempt,
          result.source,
          result
            .fetched_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
        );
        if attempt == 1 {
          println!("{}", render(&result.data)?);
        }
      }
    }

    Command::Mutate { method, path, body } => {
      let method = Method::from_str(&method.to_uppercase())
        .map_err(|e| eyre!("Invalid HTTP method {:?}: {}", method, e))?;
      let body = body
        .map(|b| serde_json::from_str(&b))
        .transpose()
        .map_err(|e| eyre!("Invalid JSON body: {}", e))?;

      let result = client.execute_mutation(method, &path, body).await?;
      println!("{}", render(&result.payload)?);
      if result.invalidated.is_empty() {
        println!("invalidated: nothing");
      }
      for key in &result.invalidated {
        println!("invalidated: {}", key);
      }
    }

    Command::Gesture {
      script,
      keys,
      surface,
    } => {
      let script = TouchScript::load(&script)?;

      // Prime the bound keys so the refresh has a loader to replay.
      let options = client.store().defaults();
      for path in &keys {
        client.read(path, options).await?;
      }

      let keys = keys.iter().map(|k| CacheKey::path(k.as_str())).collect();
      let controller = client.bind_pull_to_refresh_keys(&surface, keys);
      let mut events = EventHandler::from_script(script);
      while let Some(event) = events.next().await {
        let outcome = controller.handle(event).await;
        let view = controller.view();
        println!(
          "{:?} -> {:?} (phase={:?} pull={:.1} progress={:.0}% refreshing={})",
          event,
          outcome,
          controller.phase(),
          view.pull_distance,
          view.progress_percent,
          view.is_refreshing
        );
      }
      info!(surface = %controller.surface(), "gesture script finished");
    }

    Command::Endpoints => {
      for descriptor in client.policy().descriptors() {
        let keys: Vec<String> = descriptor
          .affected_keys
          .iter()
          .map(|k| k.to_string())
          .collect();
        println!("{:<32} {}", descriptor.pattern.as_str(), keys.join(" "));
      }
      for endpoint in CACHE_IRRELEVANT {
        println!("{:<32} (cache irrelevant)", endpoint);
      }
    }
  }

  Ok(())
}

fn render(payload: &Payload) -> Result<String> {
  match payload {
    Payload::Json(value) => Ok(serde_json::to_string_pretty(value)?),
    Payload::NoContent => Ok("(no content)".to_string()),
  }
}
