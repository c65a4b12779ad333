use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docsink_core::config::DestinationConfig;
use docsink_core::config::catalog::ConfiguredCatalog;
use docsink_core::queue::{error_channel, record_channel};
use docsink_core::store::{Store, StoreBackend};
use docsink_core::{Destination, check_store};
use tokio::io::{AsyncWrite, BufReader};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::protocol::{LogLevel, Message, MessageWriter, SharedWriter};

mod cmdline;
mod protocol;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let writer: SharedWriter<_> = Arc::new(Mutex::new(MessageWriter::new(tokio::io::stdout())));

    match matches.subcommand() {
        Some(("spec", _)) => {
            writer.lock().await.write(&Message::spec()).await?;
        }
        Some(("check", args)) => {
            let config = path_arg(args, cmdline::CONFIG_ARG)?;
            let result = check(&config).await;
            if let Err(e) = &result {
                error!(%e, "Check failed");
            }
            writer
                .lock()
                .await
                .write(&Message::connection_status(&result))
                .await?;
        }
        Some(("write", args)) => {
            let config = path_arg(args, cmdline::CONFIG_ARG)?;
            let catalog = path_arg(args, cmdline::CATALOG_ARG)?;
            if let Err(e) = write(&config, &catalog, Arc::clone(&writer)).await {
                writer
                    .lock()
                    .await
                    .write(&Message::log(LogLevel::Fatal, e.to_string()))
                    .await?;
                return Err(e);
            }
        }
        _ => return Err("unknown subcommand".into()),
    }
    Ok(())
}

fn path_arg(args: &clap::ArgMatches, name: &str) -> Result<PathBuf, Box<dyn Error>> {
    args.get_one::<PathBuf>(name)
        .cloned()
        .ok_or_else(|| format!("missing --{name}").into())
}

async fn check(config: &Path) -> docsink_core::Result<()> {
    let config = DestinationConfig::load(config)?;
    let store = StoreBackend::from_config(&config)?;
    let result = check_store(&store).await;
    if let Err(e) = store.close().await {
        warn!(%e, "Failed to close the store");
    }
    result
}

async fn write<W>(
    config: &Path,
    catalog: &Path,
    writer: SharedWriter<W>,
) -> Result<(), Box<dyn Error>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    writer
        .lock()
        .await
        .write(&Message::log(LogLevel::Info, "running write"))
        .await?;

    let config = DestinationConfig::load(config)?;
    let catalog = ConfiguredCatalog::load(catalog)?;
    let destination = Destination::from_config(&config, &catalog)?;
    // fail before consuming any input
    if let Err(e) = destination.check().await {
        destination.close().await;
        return Err(e.into());
    }

    let (record_tx, record_rx) = record_channel();
    let (errors, error_stream) = error_channel();

    let printer = tokio::spawn(protocol::print_errors(error_stream, Arc::clone(&writer)));
    let reader = tokio::spawn(protocol::read_records(
        BufReader::new(tokio::io::stdin()),
        record_tx,
        Arc::clone(&writer),
    ));

    let result = destination.write(record_rx, errors).await;
    destination.close().await;
    let reported = printer.await??;
    result?;
    let stats = reader.await??;

    info!(
        records = stats.records,
        skipped = stats.skipped,
        reported,
        "Write finished"
    );
    Ok(())
}
