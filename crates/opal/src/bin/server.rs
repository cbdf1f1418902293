use log::{error, info, logger, warn, Level};
use opal::config;
use opal_log::OpalLogger;
use opal_transport::channel::UdpChannel;
use opal_transport::segment::{FILE_NOT_FOUND, MAX_PACKET_SIZE};
use opal_transport::sender::FileSender;
use rand::Rng;
use std::fs::File;
use std::process::exit;
use tokio::net::UdpSocket;

const LOG_BUFFER: usize = 256;

fn usage() -> ! {
    error!("Usage: opal-server <port> <receive-window>");
    logger().flush();
    exit(1);
}

#[tokio::main]
async fn main() {
    OpalLogger::init(Level::Info, LOG_BUFFER).unwrap();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        usage();
    }
    let Ok(port) = args[1].parse::<u16>() else {
        error!("Invalid port: {}", args[1]);
        usage();
    };
    let Ok(receive_window) = args[2].parse::<u64>() else {
        error!("Invalid receive window: {}", args[2]);
        usage();
    };

    let config = match config::handle() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            logger().flush();
            exit(1);
        }
    };

    let bind_addr = format!("{}:{}", config.network.bind_ip, port);
    let socket = match UdpSocket::bind(&bind_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_addr, e);
            logger().flush();
            exit(1);
        }
    };
    info!(
        "Serving files from {} on {}",
        config.storage.server_dir.display(),
        bind_addr
    );

    // The session opens with a raw file-name datagram from the client.
    let mut request = vec![0u8; MAX_PACKET_SIZE];
    let (n, peer) = match socket.recv_from(&mut request).await {
        Ok(received) => received,
        Err(e) => {
            error!("Failed to receive a file request: {}", e);
            logger().flush();
            exit(1);
        }
    };
    let file_name = String::from_utf8_lossy(&request[..n]).trim().to_string();
    info!("{} requested '{}'", peer, file_name);

    let path = config.storage.server_dir.join(&file_name);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open {}: {}", path.display(), e);
            if let Err(e) = socket.send_to(FILE_NOT_FOUND, peer).await {
                error!("Failed to send the FILE NOT FOUND reply: {}", e);
            }
            info!("Reported FILE NOT FOUND to {}", peer);
            logger().flush();
            return;
        }
    };

    let initial_seq = rand::rng().random_range(0..u32::MAX / 2);
    let channel = UdpChannel::new(socket, peer);
    let sender = match FileSender::new(channel, file, initial_seq, receive_window) {
        Ok(sender) => sender,
        Err(e) => {
            error!("Failed to prepare the transfer: {}", e);
            logger().flush();
            exit(1);
        }
    };

    match sender.serve().await {
        Ok(report) => {
            let stats = &report.stats;
            let fresh = stats.slow_start_sent + stats.cong_avoid_sent;
            info!("========================================");
            info!("Total time: {:.6} secs", report.elapsed.as_secs_f64());
            info!(
                "Statistics: slow start packets: {} cong avoidance packets: {}",
                stats.slow_start_sent, stats.cong_avoid_sent
            );
            if fresh > 0 {
                info!(
                    "Statistics: slow start: {:.1}% cong avoidance: {:.1}%",
                    stats.slow_start_sent as f64 / fresh as f64 * 100.0,
                    stats.cong_avoid_sent as f64 / fresh as f64 * 100.0
                );
            }
            info!("Statistics: retransmissions: {}", stats.retransmits);
            info!("========================================");
        }
        Err(e) => {
            error!("Transfer failed: {}", e);
            logger().flush();
            exit(1);
        }
    }
    logger().flush();
}
