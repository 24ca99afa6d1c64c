mod command;
mod connection;
mod transport;

use anyhow::Result;
use command::HubCommand;
use connection::{HubController, HubWorker, WorkerConfig, WorkerEvent};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transport::{
    HubAddress, HubConnector, HubScanner, HubTarget, RfcommHubConnector, ScanConfig,
    TcpHubConnector,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // `--sim <addr>` drives a local simulator instead of a Bluetooth hub
    let sim_addr = sim_address();

    let connector: Arc<dyn HubConnector> = match sim_addr {
        Some(_) => Arc::new(TcpHubConnector::new()),
        None => Arc::new(RfcommHubConnector::default()),
    };

    info!("block sorter console starting");

    let mut worker = HubWorker::spawn(WorkerConfig::default(), connector);
    let controller = worker.controller();

    // Last sensor reading, shown by `status`
    let color_status = Arc::new(Mutex::new(None::<String>));

    // Drain worker events to the operator; color reports also update the
    // status field
    let event_color = color_status.clone();
    tokio::spawn(async move {
        while let Some(event) = worker.recv().await {
            if let WorkerEvent::ColorDetected { color } = &event {
                *event_color.lock().unwrap() = Some(color.clone());
            }
            println!("{event}");
        }
    });

    let targets = match &sim_addr {
        Some(addr) => vec![HubTarget {
            name: "simulated-hub".into(),
            address: HubAddress::Tcp(addr.clone()),
            rssi: None,
        }],
        None => Vec::new(),
    };

    console_loop(controller.clone(), targets, sim_addr.is_some(), color_status).await?;

    controller.request_disconnect();
    info!("console closed");
    Ok(())
}

/// Read operator input until quit or end of input
async fn console_loop(
    controller: HubController,
    mut targets: Vec<HubTarget>,
    simulated: bool,
    color_status: Arc<Mutex<Option<String>>>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "quit" | "exit" => break,
            "help" => print_help(),
            "status" => {
                let color = color_status.lock().unwrap().clone();
                println!("link: {:?}", controller.link_state());
                println!("color: {}", color.as_deref().unwrap_or("---"));
            }
            "scan" => {
                if !simulated {
                    match scan_for_hubs().await {
                        Ok(found) => targets = found,
                        Err(e) => {
                            warn!(error = %e, "scan failed");
                            continue;
                        }
                    }
                }
                list_targets(&targets);
            }
            "disconnect" => controller.request_disconnect(),
            _ => {
                if let Some(rest) = input.strip_prefix("connect") {
                    let chosen = rest
                        .trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| targets.get(i));
                    match chosen {
                        Some(target) => controller.request_connect(target.clone()),
                        None => println!("usage: connect <n>, after a 'scan'"),
                    }
                } else if let Ok(cmd) = input.parse::<HubCommand>() {
                    if !controller.submit_command(cmd) {
                        println!("not connected; {cmd} dropped");
                    }
                } else {
                    println!("unknown command: {input} (try 'help')");
                }
            }
        }
    }

    Ok(())
}

async fn scan_for_hubs() -> Result<Vec<HubTarget>> {
    println!("scanning...");
    let adapter = HubScanner::get_adapter().await?;
    let scanner = HubScanner::new(ScanConfig::default());
    scanner.discover(&adapter).await
}

fn list_targets(targets: &[HubTarget]) {
    if targets.is_empty() {
        println!("no hubs found");
        return;
    }
    for (i, target) in targets.iter().enumerate() {
        match target.rssi {
            Some(rssi) => {
                println!("  {}: {} [{}] ({} dBm)", i + 1, target.name, target.address, rssi)
            }
            None => println!("  {}: {} [{}]", i + 1, target.name, target.address),
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  scan               look for hubs");
    println!("  connect <n>        connect to the n-th hub from the last scan");
    println!("  disconnect         tear the connection down");
    println!("  left | right | push | pull | origin | color");
    println!("  status             show link state and last detected color");
    println!("  quit");
}

/// Simulator address from `--sim [addr]`, if given
fn sim_address() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--sim" {
            return Some(args.next().unwrap_or_else(|| "127.0.0.1:7654".into()));
        }
    }
    None
}
