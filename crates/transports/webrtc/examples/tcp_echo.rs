//! Echo over a WebRTC data channel, signaled through TCP
//!
//! The TCP connection only carries the offer and answer; the echoed
//! messages travel over the negotiated data channel.
//!
//! # Running
//!
//! ```bash
//! # Terminal 1
//! cargo run --example tcp_echo -- listen 127.0.0.1:7000
//!
//! # Terminal 2
//! cargo run --example tcp_echo -- dial 127.0.0.1:7000 hello
//! ```

use std::env;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use webrtc_net::{NetConfig, RtcConn, WebRtcNet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("listen");
    let addr = args.get(2).map(String::as_str).unwrap_or("127.0.0.1:7000");

    let net = WebRtcNet::new(NetConfig::default())?;

    match mode {
        "listen" => {
            let listener = net.listen(TcpListener::bind(addr).await?);
            println!("Echoing on {}", addr);

            loop {
                let conn = listener.accept().await?;
                tokio::spawn(async move {
                    if let Err(e) = echo(&conn).await {
                        warn!(conn = %conn.id(), error = %e, "echo stopped");
                    }
                    let _ = conn.close().await;
                });
            }
        }
        "dial" => {
            let message = args.get(3).map(String::as_str).unwrap_or("hello");
            let conn = net.dial(TcpStream::connect(addr).await?).await?;
            conn.ready().await?;
            info!(conn = %conn.id(), "data channel open");

            conn.write(message.as_bytes()).await?;
            let mut buf = vec![0u8; 64 * 1024];
            let n = conn.read(&mut buf).await?;
            println!("Echoed: {}", String::from_utf8_lossy(&buf[..n]));

            conn.close().await?;
            Ok(())
        }
        other => anyhow::bail!("unknown mode {:?}, expected listen or dial", other),
    }
}

async fn echo(conn: &RtcConn) -> webrtc_net::Result<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = conn.read(&mut buf).await?;
        conn.write(&buf[..n]).await?;
    }
}
