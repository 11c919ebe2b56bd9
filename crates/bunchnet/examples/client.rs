//! Simple client that sends numbered messages to a Bunchnet server and prints replies.
//!
//! Run the server first:
//! - cargo run -p bunchnet --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p bunchnet --example client -- 127.0.0.1:7777
//! - cargo run -p bunchnet --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    io::Cursor,
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use bunchnet::{ChannelType, DriverEvent, ErrorKind, Host};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()?;
    let count: u32 = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args
        .next()
        .unwrap_or_else(|| "300".into())
        .parse()
        .unwrap_or(300);

    let mut host = Host::bind_any()?;
    let local = host.local_addr()?;
    println!(
        "Bunchnet client bound to {} -> sending {} messages to {} (every {}ms)",
        local, count, server_addr, interval_ms
    );

    host.connect(server_addr)?;
    let ch_index = host.open_channel(server_addr, ChannelType::ACTOR)?;

    for i in 0..count {
        let mut message = Vec::new();
        message.write_u32::<LittleEndian>(i)?;
        message.extend_from_slice(format!("hello {} from {}", i, local).as_bytes());
        // Every other message goes unreliably to show both paths.
        match host.send(server_addr, ch_index, &message, i % 2 == 0) {
            Err(ErrorKind::NetSaturated) => println!("[skip] message {}: connection saturated", i),
            result => {
                result?;
            }
        }

        let start = Instant::now();
        let wait = Duration::from_millis(interval_ms);

        while start.elapsed() < wait {
            host.manual_poll(Instant::now());

            while let Some(event) = host.recv() {
                match event {
                    DriverEvent::Connected(addr) => {
                        println!("[connect] {}", addr);
                    }
                    DriverEvent::Bunch(delivery) => {
                        let mut cursor = Cursor::new(&delivery.data);
                        let sequence = cursor.read_u32::<LittleEndian>()?;
                        let text =
                            String::from_utf8_lossy(&delivery.data[cursor.position() as usize..]);
                        println!(
                            "[reply] from={} channel={} reliable={} seq={} payload=\"{}\"",
                            delivery.addr, delivery.ch_index, delivery.reliable, sequence, text
                        );
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

    host.disconnect(server_addr)?;
    host.manual_poll(Instant::now());
    println!("done, {}", host.stats());
    Ok(())
}
