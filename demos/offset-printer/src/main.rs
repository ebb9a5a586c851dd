//! Stand-in for the out-of-scope "demo front-end": start a service, attach
//! iterative requests to every peer named on the command line, and print
//! smoothed offsets once a second.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use cofetcher_daemon::Service;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Print clock offsets to a set of peers")]
struct Args {
    /// Local UDP port to bind the service to.
    #[clap(long, default_value_t = 3000)]
    port: u16,

    /// Number of offsets to keep per peer before trimming.
    #[clap(long, default_value_t = 20)]
    offset_counts: u16,

    /// Ports on 127.0.0.1 to send iterative time requests to.
    peer_ports: Vec<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let service = Service::new(args.port, args.offset_counts, 5)
        .await
        .expect("failed to bind local UDP socket");

    let peers: Vec<SocketAddr> = args
        .peer_ports
        .iter()
        .map(|&port| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
        .collect();

    for &peer in &peers {
        info!(%peer, "starting iterative time request");
        service.init_iterative_time_request(peer);
    }

    let run_service = service.clone();
    let run_handle = tokio::spawn(async move { run_service.run().await });

    let print_service = service.clone();
    let print_handle = tokio::spawn(async move {
        loop {
            for (peer, offset_ns) in print_service.get_offsets() {
                println!("{peer} - {}us", offset_ns / 1000);
            }
            println!();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    tokio::signal::ctrl_c().await.expect("failed to wait for ctrl-c");
    print_handle.abort();
    service.shutdown().await;
    run_handle.abort();
}
