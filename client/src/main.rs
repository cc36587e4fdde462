use clap::Parser;
use hello_client::{client_main, Opt};
use hello_duplex::error::HelloError;
use hello_duplex::format_error;
use log::info;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .without_time()
            .finish(),
    )
    .expect("setting tracing default failed");
    tracing_log::LogTracer::init().expect("setting log tracer failed");

    let opt = Opt::parse();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, closing the duplex channel");
                shutdown.cancel();
            }
        });
    }

    let result = match opt.load_config() {
        Ok(config) => client_main(config, &shutdown, |line| println!("{}", line)).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        if let Some(HelloError::Cancelled) = e.downcast_ref::<HelloError>() {
            info!("Interrupted before the duplex channel was opened");
            std::process::exit(130);
        }
        eprintln!("{}", format_error(e));
        std::process::exit(1);
    }
}
