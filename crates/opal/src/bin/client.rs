use log::{error, info, logger, Level};
use opal::config;
use opal_log::OpalLogger;
use opal_transport::channel::{LinkConditioner, LinkMode, UdpChannel};
use opal_transport::error::TransportError;
use opal_transport::receiver::FileReceiver;
use std::fs::File;
use std::process::exit;
use tokio::net::{lookup_host, UdpSocket};

const LOG_BUFFER: usize = 256;

fn usage() -> ! {
    error!(
        "Usage: opal-client <server-ip> <server-port> <file-name> \
         <receive-window> <channel-mode> <prob-percent>"
    );
    logger().flush();
    exit(1);
}

#[tokio::main]
async fn main() {
    OpalLogger::init(Level::Info, LOG_BUFFER).unwrap();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 7 {
        usage();
    }
    let server_ip = args[1].clone();
    let Ok(port) = args[2].parse::<u16>() else {
        error!("Invalid port: {}", args[2]);
        usage();
    };
    let file_name = args[3].clone();
    let Ok(receive_window) = args[4].parse::<u64>() else {
        error!("Invalid receive window: {}", args[4]);
        usage();
    };
    let mode = match args[5].parse::<u8>().ok().and_then(LinkMode::from_code) {
        Some(mode) => mode,
        None => {
            error!("Channel mode must be 0 (none), 1 (drop), 2 (delay) or 3 (both)");
            usage();
        }
    };
    let prob_percent = match args[6].parse::<u8>() {
        Ok(prob) if prob <= 100 => prob,
        _ => {
            error!("Drop/delay probability must be in 0..=100");
            usage();
        }
    };

    let config = match config::handle() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            logger().flush();
            exit(1);
        }
    };

    let server_addr = match lookup_host((server_ip.as_str(), port)).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                error!("No such host: {}", server_ip);
                logger().flush();
                exit(1);
            }
        },
        Err(e) => {
            error!("Failed to resolve {}: {}", server_ip, e);
            logger().flush();
            exit(1);
        }
    };

    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to open a datagram socket: {}", e);
            logger().flush();
            exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.storage.client_dir) {
        error!(
            "Failed to create {}: {}",
            config.storage.client_dir.display(),
            e
        );
        logger().flush();
        exit(1);
    }
    let output_path = config.storage.client_dir.join(&file_name);
    let output = match File::create(&output_path) {
        Ok(file) => file,
        Err(e) => {
            error!("Failed to create {}: {}", output_path.display(), e);
            logger().flush();
            exit(1);
        }
    };

    info!(
        "Fetching '{}' from {} (window {}, mode {:?}, prob {}%)",
        file_name, server_addr, receive_window, mode, prob_percent
    );
    let channel = UdpChannel::new(socket, server_addr);
    let conditioner = LinkConditioner::new(mode, prob_percent);
    let mut receiver = FileReceiver::new(channel, output, receive_window, conditioner);

    match receiver.fetch(&file_name).await {
        Ok(()) => info!("Downloaded '{}' to {}", file_name, output_path.display()),
        // Already reported by the transfer loop; a missing remote file is a
        // clean exit.
        Err(TransportError::FileNotFound) => {}
        Err(e) => {
            error!("Transfer failed: {}", e);
            logger().flush();
            exit(1);
        }
    }
    logger().flush();
}
