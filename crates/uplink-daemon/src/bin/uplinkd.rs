use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};

use uplink::hardware::Hardware;
use uplink::logs::LogForwarder;
use uplink::params::Params;
use uplink::queues::Queues;
use uplink::registration::Registrar;
use uplink::rpc::{build_dispatcher, BuildInfo, HandlerContext};
use uplink::telemetry::MessageBus;
use uplink::uploads::UploadQueue;

use uplink_daemon::bus::SocketBus;
use uplink_daemon::config::DaemonConfig;
use uplink_daemon::device::DeviceInterface;
use uplink_daemon::ws;

#[derive(Parser, Debug)]
#[command(name = "uplinkd")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_host: Option<String>,
    #[arg(long)]
    ws_host: Option<String>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    let mut config = DaemonConfig::load(args.config.as_deref()).expect("load config");
    if let Some(host) = args.api_host {
        config.api_host = host;
    }
    if let Some(host) = args.ws_host {
        config.ws_host = host;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }

    let params = Params::new(&config.params_dir).expect("create params dir");
    let hardware: Arc<dyn Hardware> = Arc::new(DeviceInterface::new(&config.persist_dir));
    let bus: Arc<dyn MessageBus> = Arc::new(SocketBus::new(&config.bus_socket));
    let uploads = UploadQueue::new();
    let client = reqwest::Client::new();

    let dispatcher = Arc::new(build_dispatcher(Arc::new(HandlerContext {
        bus,
        hardware: hardware.clone(),
        uploads: uploads.clone(),
        params: params.clone(),
        persist_dir: config.persist_dir.clone(),
        build_info: BuildInfo::from_env(),
    })));
    log::info!(
        "uplinkd starting: methods={:?} tunnel_ports={:?}",
        dispatcher.methods(),
        config.local_port_allowlist
    );

    let Queues {
        calls_tx,
        calls_rx,
        results_tx,
        results_rx,
        log_send_tx,
        log_send_rx,
        log_ack_tx,
        log_ack_rx,
    } = Queues::new();

    // bounded dispatch pool, caps concurrent telemetry reads
    let calls_rx = Arc::new(tokio::sync::Mutex::new(calls_rx));
    for worker in 0..config.handler_concurrency {
        let calls_rx = calls_rx.clone();
        let dispatcher = dispatcher.clone();
        let results_tx = results_tx.clone();
        tokio::spawn(async move {
            loop {
                let request = { calls_rx.lock().await.recv().await };
                let Some(request) = request else { break };
                let response = dispatcher.dispatch(request).await;
                match serde_json::to_string(&response) {
                    Ok(text) => {
                        let _ = results_tx.send(text);
                    }
                    Err(err) => log::error!("dispatch[{worker}]: encoding response failed: {err}"),
                }
            }
            log::info!("dispatch[{worker}]: inbound queue closed");
        });
    }

    tokio::spawn(uploads.clone().drain(client.clone()));

    let mut forwarder = LogForwarder::new(&config.log_dir, log_send_tx.clone(), log_ack_rx);
    tokio::spawn(async move { forwarder.run().await });

    let registrar = Registrar::new(
        client,
        config.api_host.clone(),
        params,
        &config.persist_dir,
        hardware,
    );
    tokio::spawn(ws::run_conn_loop(
        registrar,
        config.ws_host.clone(),
        calls_tx.clone(),
        log_ack_tx.clone(),
        results_tx.clone(),
        results_rx,
        log_send_rx,
    ));

    wait_for_shutdown().await;
    // durable state is already on disk; nothing to flush
    log::info!("uplinkd: terminating");
}

async fn wait_for_shutdown() {
    let mut term = signal(SignalKind::terminate()).expect("install signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
