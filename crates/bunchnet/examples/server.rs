//! Simple echo server using Bunchnet.
//!
//! Every bunch is sent back on the channel it arrived on, with the same
//! reliability.
//!
//! Run:
//! - cargo run -p bunchnet --example server
//! - cargo run -p bunchnet --example server -- 127.0.0.1:7777

use std::{
    env,
    io::Cursor,
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use bunchnet::{Config, DriverEvent, Host};
use byteorder::{LittleEndian, ReadBytesExt};

fn parse_bind_addr() -> Option<SocketAddr> {
    let mut args = env::args().skip(1);
    args.next().and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Basic config; tweak here if you want to demo features quickly
    let mut config = Config::default();
    config.net_speed = 10_000;
    // Uncomment to try simulated network conditions:
    // config.simulation.loss_percent = 10;
    // config.simulation.lag = Duration::from_millis(80);

    let bind_addr = match parse_bind_addr() {
        Some(addr) => addr,
        None => "127.0.0.1:9000".parse()?,
    };
    let mut host = Host::bind_with_config(bind_addr, config)?;
    let local = host.local_addr()?;
    println!("Bunchnet echo server listening on {}", local);
    println!("Send from client example to this address to see echoes.");

    loop {
        host.manual_poll(Instant::now());

        while let Some(event) = host.recv() {
            match event {
                DriverEvent::Connected(addr) => {
                    println!("[connect] {}", addr);
                }
                DriverEvent::Bunch(delivery) => {
                    let mut cursor = Cursor::new(&delivery.data);
                    let sequence = cursor.read_u32::<LittleEndian>().unwrap_or_default();
                    let text = String::from_utf8_lossy(&delivery.data[cursor.position() as usize..]);
                    println!(
                        "[bunch] from={} channel={} ({}) reliable={} seq={} payload=\"{}\"",
                        delivery.addr,
                        delivery.ch_index,
                        delivery.ch_type,
                        delivery.reliable,
                        sequence,
                        text
                    );

                    if let Err(e) =
                        host.send(delivery.addr, delivery.ch_index, &delivery.data, delivery.reliable)
                    {
                        eprintln!("failed to queue echo: {}", e);
                    }
                }
                DriverEvent::Closed(addr) => {
                    println!("[closed] {}", addr);
                }
                DriverEvent::TimedOut(addr) => {
                    println!("[timeout] {}", addr);
                }
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
