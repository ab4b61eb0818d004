//! `icnd interest`: a one-shot consumer sending an Interest over UDP and
//! printing the reply.

use anyhow::{Context, Result};
use log::{debug, info};
use rust_icnd_common::{
    name::Name,
    packet::{Interest, Packet},
};
use rust_icnd_fwd::codec::{PacketCodec, TextCodec};
use rust_icnd_fwd::MAX_DATAGRAM_SIZE;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::utils::format_duration;

pub async fn send_interest(name_str: String, target: String, timeout_ms: u64) -> Result<()> {
    info!("sending Interest for {name_str} to {target}");
    let name = Name::from_string(&name_str);
    let codec = TextCodec::new();

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind a local socket")?;
    let wire = codec.encode(&Interest::new(name.clone()).into())?;

    println!("Sending Interest: {name}");
    let start = Instant::now();
    socket
        .send_to(&wire, &target)
        .await
        .with_context(|| format!("failed to send to {target}"))?;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let received = timeout(
        Duration::from_millis(timeout_ms),
        socket.recv_from(&mut buf),
    )
    .await;
    let elapsed = start.elapsed();

    let (len, from) = match received {
        Ok(result) => result.context("receive failed")?,
        Err(_) => {
            println!("Timeout after {timeout_ms}ms");
            return Ok(());
        }
    };
    debug!("{len} bytes from {from}");

    match codec.decode(&buf[..len])? {
        Packet::Content(content) => {
            println!("\nReceived Content after {}:", format_duration(elapsed));
            println!("  Name: {}", content.name);
            let payload = &content.payload;
            if payload.len() <= 100 {
                println!("  Payload: {:?}", payload);
                if let Ok(text) = std::str::from_utf8(payload) {
                    println!("  Payload (as text): {text}");
                }
            } else {
                println!("  Payload: {} bytes", payload.len());
                println!("  Payload (first 100 bytes): {:?}", &payload[..100]);
            }
        }
        Packet::Nack(nack) => {
            println!("\nReceived Nack after {}:", format_duration(elapsed));
            println!("  Name: {}", nack.name);
            println!("  Reason: {}", nack.reason);
        }
        Packet::Interest(interest) => {
            println!("\nUnexpected Interest reply for {}", interest.name);
        }
    }

    Ok(())
}
