use std::sync::Arc;

use anyhow::Context;
use finshared_events::MessageListener;
use finshared_infra::BrokerParams;
use finshared_infra::event_bus::RedisStreamsTransport;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    finshared_observability::init();

    let params = BrokerParams::from_env().context("reading broker configuration")?;
    let queue = finshared_relay::queue_from_lookup(|k| std::env::var(k).ok());

    let transport = RedisStreamsTransport::from_params(&params)?.with_consumer("finshared-relay");
    let listener = Arc::new(MessageListener::new(transport, queue.clone()));

    tokio::spawn(finshared_relay::stop_on_interrupt(
        listener.stop_handle(),
        tokio::signal::ctrl_c(),
    ));

    info!(queue = %queue, host = %params.host, "relay starting");
    let outcome = finshared_relay::run(&listener).await;
    listener.close().await?;
    outcome?;

    info!("relay stopped");
    Ok(())
}
