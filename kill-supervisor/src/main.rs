use anyhow::{Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use supervisor_listener::{Listener, ListenerConfig, ParentProcess, DEFAULT_PROCESS_NAME};
use tokio::io::BufReader;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
};
use tracing_appender::non_blocking::WorkerGuard;

mod tracing_panic_handler;

#[derive(clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    Human,
    Json,
}

/// supervisord event listener that stops supervisord once the watched program exits.
#[derive(Parser, Clone)]
#[clap()]
pub struct ConfigOpts {
    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,

    /// Name of the supervisord program whose exit stops supervisord.
    #[arg(long, default_value = DEFAULT_PROCESS_NAME, value_parser = NonEmptyStringValueParser::new())]
    pub process_name: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = ConfigOpts::parse();
    let guard = init_tracing(opts.log_format);

    let code = match run(opts).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("{err:?}");
            1
        }
    };

    // A read on tokio's stdin runs on a blocking thread that cannot be cancelled,
    // so dropping the runtime could hang until the supervisor sends another line.
    drop(guard);
    std::process::exit(code);
}

pub fn init_tracing(format: LogFormat) -> WorkerGuard {
    // stdout belongs to the supervisor protocol, logs must only ever go to stderr.
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

    let builder = tracing_subscriber::fmt().with_writer(non_blocking);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Human => builder.init(),
    }

    // When in json mode we need to process panics as events instead of printing them directly.
    // This is so that:
    // * We dont include invalid json in the log output
    // * panics can be received by whatever is processing the json events
    //
    // We dont do this for LogFormat::Human because the default panic messages are more readable for humans
    if let LogFormat::Json = format {
        crate::tracing_panic_handler::setup();
    }

    guard
}

async fn run(opts: ConfigOpts) -> Result<()> {
    // Register the handlers before reading any events, creating them inside the spawned task
    // would leave a window where SIGTERM from supervisord kills us without a clean shutdown.
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let (trigger_shutdown_tx, mut trigger_shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT");
            },
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM");
            },
        };

        trigger_shutdown_tx.send(true).ok();
    });

    tracing::info!("watching for exit of {:?}", opts.process_name);
    let mut listener = Listener::new(
        ListenerConfig::new(opts.process_name),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        tokio::io::stderr(),
        ParentProcess,
    );

    tokio::select! {
        result = listener.run() => result.context("event listener failed"),
        _ = trigger_shutdown_rx.changed() => Ok(()),
    }
}
