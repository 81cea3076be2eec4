use std::time::Duration;

use log::info;

use walk_coord::{
    build_router, logging, Database, Error, Result, ServerOptions, WalkChannel, WalkService,
};

#[tokio::main]
async fn main() -> Result<()> {
    let options = match ServerOptions::from_args() {
        Ok(options) => options,
        Err(Error::InvalidInput(message)) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
        Err(err) => return Err(err),
    };
    logging::init_logger(&options)?;

    info!("options: {options}");

    let db = Database::open(options.db_path.clone())?;
    let channel = WalkChannel::new(options.event_capacity);
    let service = WalkService::new(db, channel.clone(), options.claim_minutes);

    // Background sweep of roster entries that stopped pinging.
    let stale_after = chrono::Duration::minutes(options.roster_stale_minutes);
    let prune_channel = channel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            prune_channel.prune_stale(stale_after, chrono::Utc::now());
        }
    });

    let router = build_router(service);
    let listener = tokio::net::TcpListener::bind(options.bind).await?;
    info!("server: listening bind={}", options.bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server: shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("server: failed to install ctrl-c handler err={err}");
        return;
    }
    info!("server: shutdown requested");
}
