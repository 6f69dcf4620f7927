use std::{future::Future, sync::Arc};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

use broker::sqlite::SqliteBroker;
use config::Config;
use error::Error;
use mail::Mailer;
use processor::TaskProcessor;

pub mod broker;
pub mod config;
pub mod distributor;
pub mod error;
pub mod mail;
pub mod processor;
pub mod registry;
pub mod task;
pub mod tasks;

/// Returns a builder for the task processor daemon.
///
/// Connects the broker, builds the handler registry around the supplied
/// mailer, runs the worker pools until ctrl-c, then shuts down
/// cooperatively.
#[bon::builder(finish_fn = start)]
pub async fn run<M, F, R>(mailer_factory: M) -> eyre::Result<()>
where
    M: FnOnce() -> F,
    F: Future<Output = Result<R, Error>>,
    R: Mailer,
{
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("LEDGERBANK_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("LEDGERBANK_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;

    let broker = SqliteBroker::connect_with(&config).await?;

    let mailer = mailer_factory().await?;
    let registry = Arc::new(tasks::default_registry(Arc::new(mailer)));

    let mut processor = TaskProcessor::new(broker, registry, config);
    processor.start()?;

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    processor.shutdown().await;

    Ok(())
}
