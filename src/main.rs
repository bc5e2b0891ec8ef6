use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cohort_broadcast::BroadcastSequence;
use cohort_cache::{CacheKey, KeyedCache};
use cohort_config::{CohortConfig, Discipline};
use cohort_core::WorkError;
use cohort_work::UnitOfWork;

/// Cohort - cancellable shared work, multicast sequences and a keyed work cache
#[derive(Parser)]
#[command(name = "cohort")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to a JSON config file (default: ~/.cohort/config.json if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Drive one counting unit of work from several tasks at once
  Work {
    /// Number of concurrent drivers
    #[arg(long, default_value_t = 3)]
    drivers: usize,

    /// plain, lazy or shared (default: from config)
    #[arg(long, value_parser = parse_discipline)]
    discipline: Option<Discipline>,
  },

  /// Fan one producer out to several consumers
  Broadcast {
    /// Number of consumers
    #[arg(long, default_value_t = 3)]
    consumers: usize,

    /// Number of elements the producer emits
    #[arg(long, default_value_t = 5)]
    elements: usize,
  },

  /// Issue concurrent requests for one cache key
  Cache {
    /// Number of concurrent requests
    #[arg(long, default_value_t = 4)]
    requests: usize,

    /// Make the cached work fail
    #[arg(long)]
    fail: bool,
  },

  /// Race a slow unit of work against a timer
  Timeout {
    /// Timer length in milliseconds
    #[arg(long)]
    millis: u64,
  },
}

fn parse_discipline(value: &str) -> Result<Discipline, String> {
  serde_json::from_value(serde_json::Value::String(value.to_string()))
    .map_err(|_| format!("unknown discipline '{}', expected plain, lazy or shared", value))
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let config = load_config(cli.config)?;
  init_logging(&config);

  let Some(command) = cli.command else {
    println!("cohort - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Work {
        drivers,
        discipline,
      } => run_work(drivers, discipline.unwrap_or(config.work.discipline)).await,
      Commands::Broadcast {
        consumers,
        elements,
      } => run_broadcast(consumers, elements).await,
      Commands::Cache { requests, fail } => run_cache(&config, requests, fail).await,
      Commands::Timeout { millis } => run_timeout(millis).await,
    }
  })
}

fn load_config(path: Option<PathBuf>) -> Result<CohortConfig> {
  let path = match path {
    Some(path) => path,
    None => {
      let Some(default) = dirs::home_dir().map(|home| home.join(".cohort").join("config.json"))
      else {
        return Ok(CohortConfig::default());
      };
      if !default.exists() {
        return Ok(CohortConfig::default());
      }
      default
    }
  };

  let config = CohortConfig::load(&path)
    .with_context(|| format!("failed to load config file: {}", path.display()))?;
  debug!(path = %path.display(), "loaded config");
  Ok(config)
}

fn init_logging(config: &CohortConfig) {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

/// Work that counts its invocations and takes a moment to finish.
fn counting_work(counter: &Arc<AtomicUsize>, fail: bool) -> UnitOfWork<usize, String> {
  let counter = counter.clone();
  UnitOfWork::new(move |token: CancellationToken| {
    let counter = counter.clone();
    async move {
      let invocation = counter.fetch_add(1, Ordering::SeqCst) + 1;
      tokio::select! {
        _ = token.cancelled() => return Err("stopped early".to_string()),
        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
      }
      if fail {
        Err(format!("invocation {} failed", invocation))
      } else {
        Ok(invocation)
      }
    }
  })
}

fn describe<T: std::fmt::Debug>(outcome: &Result<T, WorkError<String>>) -> String {
  match outcome {
    Ok(value) => format!("ok {:?}", value),
    Err(err) => format!("error: {}", err),
  }
}

async fn run_work(drivers: usize, discipline: Discipline) -> Result<()> {
  let counter = Arc::new(AtomicUsize::new(0));
  let work = counting_work(&counter, false).with_discipline(discipline);

  eprintln!("Driving {:?} work from {} tasks", discipline, drivers);

  let handles: Vec<_> = (0..drivers)
    .map(|_| {
      let work = work.clone();
      tokio::spawn(async move { work.execute().await })
    })
    .collect();

  for (driver, handle) in handles.into_iter().enumerate() {
    let outcome = handle.await.context("driver task failed")?;
    println!("driver {}: {}", driver, describe(&outcome));
  }

  println!("operation ran {} time(s)", counter.load(Ordering::SeqCst));
  Ok(())
}

async fn run_broadcast(consumers: usize, elements: usize) -> Result<()> {
  let producer = stream::iter((0..elements).map(Ok::<usize, String>));
  let sequence = BroadcastSequence::new(producer);

  let handles: Vec<_> = (0..consumers)
    .map(|_| {
      let mut iterator = sequence.make_iterator();
      tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
          match iterator.next().await {
            Ok(Some(value)) => seen.push(value),
            Ok(None) => return Ok(seen),
            Err(err) => return Err(err),
          }
        }
      })
    })
    .collect();

  for (consumer, handle) in handles.into_iter().enumerate() {
    let outcome = handle.await.context("consumer task failed")?;
    println!("consumer {}: {}", consumer, describe(&outcome));
  }

  Ok(())
}

async fn run_cache(config: &CohortConfig, requests: usize, fail: bool) -> Result<()> {
  let cache = KeyedCache::from_config(&config.cache);
  let key = CacheKey::of("demo");
  let invocations = Arc::new(AtomicUsize::new(0));
  let factories = Arc::new(AtomicUsize::new(0));

  let request = |cache: KeyedCache| {
    let invocations = invocations.clone();
    let factories = factories.clone();
    async move {
      let work: UnitOfWork<usize, String> = cache.retrieve_or_create(key, || {
        factories.fetch_add(1, Ordering::SeqCst);
        counting_work(&invocations, fail).lazy()
      })?;
      anyhow::Ok(work.execute().await)
    }
  };

  let outcomes = join_all((0..requests).map(|_| request(cache.clone()))).await;
  for (index, outcome) in outcomes.into_iter().enumerate() {
    println!("request {}: {}", index, describe(&outcome?));
  }

  let after = request(cache.clone()).await?;
  println!("request after completion: {}", describe(&after));

  println!(
    "factory ran {} time(s), operation ran {} time(s), {} entr(ies) cached",
    factories.load(Ordering::SeqCst),
    invocations.load(Ordering::SeqCst),
    cache.len()
  );
  Ok(())
}

async fn run_timeout(millis: u64) -> Result<()> {
  let work: UnitOfWork<&'static str, String> = UnitOfWork::new(|token: CancellationToken| async move {
    tokio::select! {
      _ = token.cancelled() => Err("cancelled before finishing".to_string()),
      _ = tokio::time::sleep(Duration::from_secs(1)) => Ok("finished"),
    }
  });

  let outcome = tokio::select! {
    outcome = work.execute() => outcome,
    _ = tokio::time::sleep(Duration::from_millis(millis)) => {
      work.cancel();
      work.execute().await
    }
  };

  println!("{}", describe(&outcome));
  Ok(())
}
