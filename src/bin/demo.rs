//! Voltage Modbus Server Demo
//!
//! Starts a slave server with two units and serves them over Modbus TCP and
//! RTU-over-TCP until Ctrl+C:
//! - unit 1: holding registers 0-9 hold 0..=9, coils 0-3 alternate ON/OFF
//! - unit 2: input registers 0-1 hold a counter the demo bumps every second
//! - function code 0x41: custom handler returning the unit's register 0
//!
//! Usage: cargo run --bin demo [tcp_address] [rtu_over_tcp_address]
//! Example: cargo run --bin demo 127.0.0.1:5020 127.0.0.1:5021

use std::sync::Arc;
use std::time::Duration;

use voltage_modbus_server::{
    CallbackSink, Frame, HandlerResult, LogLevel, PduBuilder, Server, ServerConfig, SlaveData,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let tcp_addr = args.next().unwrap_or_else(|| "127.0.0.1:5020".to_string());
    let rtu_addr = args.next().unwrap_or_else(|| "127.0.0.1:5021".to_string());

    println!("🚀 {}", voltage_modbus_server::info());
    println!("=============================================");

    let sink = CallbackSink::console().with_level(LogLevel::Debug);
    let config = ServerConfig::new()
        .with_request_queue_capacity(8)
        .with_event_sink(Arc::new(sink));
    let server = Server::with_config(config);

    // =========================================================================
    // Slaves
    // =========================================================================
    server.register_slave(1)?;
    server.register_slave(2)?;

    server
        .with_slave(1, |data| {
            for addr in 0..10u16 {
                data.holding_registers.set(addr, addr);
            }
            for addr in 0..4u16 {
                data.coils.set(addr, addr % 2 == 0);
            }
        })
        .await?;

    server.register_handler(0x41, |slave: &mut SlaveData, _: &Frame| -> HandlerResult {
        Ok(PduBuilder::new()
            .u16(slave.holding_registers.get(0))
            .build())
    })?;

    // =========================================================================
    // Listeners
    // =========================================================================
    let tcp = server.listen_tcp(tcp_addr.as_str()).await?;
    let rtu = server.listen_rtu_over_tcp(rtu_addr.as_str()).await?;
    println!("📡 Modbus TCP on {}", tcp);
    println!("📡 RTU-over-TCP on {}", rtu);

    if let Some(mut signal) = server.connection_signal() {
        tokio::spawn(async move {
            if let Some(addr) = signal.recv().await {
                println!("✅ first client connected via {}", addr);
            }
        });
    }

    println!("Press Ctrl+C to stop\n");

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut counter: u32 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                counter = counter.wrapping_add(1);
                let words = [(counter >> 16) as u16, counter as u16];
                server
                    .with_slave(2, move |data| data.input_registers.write(0, &words))
                    .await??;
            }
        }
    }

    println!("\n🔌 Shutting down");
    server.close().await?;
    Ok(())
}
