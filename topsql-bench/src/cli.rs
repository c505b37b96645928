//! Command line entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretBox;
use topsql_store::InfluxStore;
use topsql_store::backend::flux::top_cpu_time_flux;
use topsql_store::generator::{self, Generator};
use topsql_types::ConfigSecret;
use yansi::Paint;

use crate::config::{Config, TiDb};
use crate::grpc::GrpcCollectorStream;
use crate::observability;
use crate::query::MySqlConnector;
use crate::streamer::{BatchStreamer, synthetic_batch};

/// Load generator for top-SQL storage backends.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    QueryTiDb(QueryTiDbCommand),
    QueryInflux(QueryInfluxCommand),
    WriteInflux(WriteInfluxCommand),
    Stream(StreamCommand),
    Version(VersionCommand),
}

/// run concurrent top-N queries against TiDB
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "query-tidb")]
struct QueryTiDbCommand {
    /// connection URL of the TiDB server, overrides `tidb.dsn`
    #[argh(option)]
    dsn: Option<String>,

    /// number of concurrent workers, overrides `tidb.workers`
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// total number of queries, overrides `tidb.queries`
    #[argh(option, short = 'n')]
    queries: Option<i64>,

    /// randomize query parameters before every query
    #[argh(switch, short = 'r')]
    random: bool,

    /// seed for randomized parameters, overrides `tidb.seed`
    #[argh(option)]
    seed: Option<u64>,
}

/// run the top CPU time query against InfluxDB and read back all records
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "query-influx")]
struct QueryInfluxCommand {
    /// start of the range in seconds
    #[argh(option, default = "0")]
    start: i64,

    /// end of the range in seconds
    #[argh(option, default = "3600")]
    end: i64,

    /// instance to query
    #[argh(option, default = "1")]
    instance: u32,

    /// number of samples kept per timestamp
    #[argh(option, default = "5")]
    limit: u32,
}

/// write a synthetic data set to InfluxDB
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "write-influx")]
struct WriteInfluxCommand {
    /// number of instances, overrides `generator.instances`
    #[argh(option)]
    instances: Option<u32>,

    /// number of statements per instance, overrides `generator.sqls`
    #[argh(option)]
    sqls: Option<u32>,
}

/// send a synthetic batch to the collector over gRPC
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "stream")]
struct StreamCommand {
    /// collector endpoint, overrides `collector.addr`
    #[argh(option)]
    addr: Option<String>,

    /// number of entries in the batch, overrides `collector.batch_len`
    #[argh(option)]
    len: Option<usize>,
}

/// print the version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing();
    tracing::debug!(?config);

    let result = runtime.block_on(async move {
        match args.command {
            Command::QueryTiDb(command) => query_tidb(config, command).await,
            Command::QueryInflux(command) => query_influx(config, command).await,
            Command::WriteInflux(command) => write_influx(config, command).await,
            Command::Stream(command) => stream(config, command).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    });

    if let Err(ref error) = result {
        tracing::error!(
            error = &**error as &dyn std::error::Error,
            "command failed"
        );
    }
    result
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} {elapsed}")?)
        .with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

impl QueryTiDbCommand {
    /// Overrides the loaded `tidb` section with the flags that were given.
    fn apply(self, tidb: &mut TiDb) {
        if let Some(dsn) = self.dsn {
            tidb.dsn = SecretBox::new(Box::new(ConfigSecret::from(dsn.as_str())));
        }
        if let Some(workers) = self.workers {
            tidb.workers = workers;
        }
        if let Some(queries) = self.queries {
            tidb.queries = queries;
        }
        if self.random {
            tidb.randomize = true;
        }
        if self.seed.is_some() {
            tidb.seed = self.seed;
        }
    }
}

async fn query_tidb(config: Config, command: QueryTiDbCommand) -> Result<()> {
    let mut tidb = config.tidb;
    command.apply(&mut tidb);

    let connector = Arc::new(MySqlConnector::new(tidb.dsn.clone()));
    let bar = spinner("Querying TiDB:")?;
    let result = crate::harness::run(connector, tidb.harness()).await;
    bar.finish_and_clear();

    result.context("query benchmark failed")?.print();
    Ok(())
}

async fn query_influx(config: Config, command: QueryInfluxCommand) -> Result<()> {
    let store = InfluxStore::new(config.influx);
    let flux = top_cpu_time_flux(
        store.bucket(),
        command.start,
        command.end,
        command.instance,
        command.limit,
    );

    let mut cursor = match store.query(&flux).await {
        Ok(cursor) => cursor,
        Err(error) => {
            // One-off queries report their failure and leave the exit status alone.
            tracing::error!(
                error = &error as &dyn std::error::Error,
                %flux,
                "failed to execute query"
            );
            return Ok(());
        }
    };

    let records = cursor.drain().await;
    println!("{} {} records", "## FLUX".bold(), records.bold().blue());
    Ok(())
}

async fn write_influx(config: Config, command: WriteInfluxCommand) -> Result<()> {
    let mut generator_config = config.generator;
    if let Some(instances) = command.instances {
        generator_config.instances = instances;
    }
    if let Some(sqls) = command.sqls {
        generator_config.sqls = sqls;
    }

    let store = InfluxStore::new(config.influx);
    let generator = Generator::new(generator_config);

    let bar = spinner("Writing to InfluxDB:")?;
    let result = generator::load(&store, &generator).await;
    bar.finish_and_clear();

    let written = result.context("failed to write data set")?;
    println!("{} {} records", "## WRITTEN".bold(), written.bold().blue());
    Ok(())
}

async fn stream(config: Config, command: StreamCommand) -> Result<()> {
    let addr = command.addr.unwrap_or(config.collector.addr);
    let len = command.len.unwrap_or(config.collector.batch_len);

    let stream = GrpcCollectorStream::connect(addr.clone())
        .await
        .with_context(|| format!("failed to open collector stream to {addr}"))?;
    let report = BatchStreamer::new(stream)
        .send_batch(synthetic_batch(len))
        .await
        .context("failed to send batch")?;

    println!(
        "{} {} entries acknowledged in {:.2?}",
        "## STREAM".bold(),
        report.acknowledged.bold().blue(),
        report.elapsed
    );
    Ok(())
}
