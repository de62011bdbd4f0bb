//! # Example: concurrent_uart
//!
//! Several ground requests hit the same serial port at once. Each invocation
//! waits for exclusive access to the port, so echoes never interleave, and a
//! request stuck waiting for the port can be cancelled by id.
//!
//! ## Flow
//! ```text
//! dispatch × 4 ──► UARTLoopback ──► open /dev/ttyS1 (one holder at a time)
//!                                       ├─► write line
//!                                       └─► read line (slow line, 200ms)
//! dispatch #900 ──► waits for the port ──► cancel(#900) ──► Cancelled
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example concurrent_uart
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use payloadvisor::peripherals::Hardware;
use payloadvisor::sim::LoopbackUart;
use payloadvisor::{
    AppConfig, ExecutionContext, HandlerFn, InvocationRequest, PayloadApplication, RequestId,
    SequenceError, SequenceOptions,
};

async fn echo(ctx: ExecutionContext) -> Result<String, SequenceError> {
    let port = ctx.uart()?.open("/dev/ttyS1").await?;
    let line = format!("{}\n", ctx.params_str()?);
    port.write(line.as_bytes()).await?;
    let back = port.read_line().await?;
    Ok(String::from_utf8_lossy(&back).trim_end().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let uart = Arc::new(LoopbackUart::new(&["/dev/ttyS1"]).with_read_delay(Duration::from_millis(200)));
    let cfg = AppConfig {
        handle_os_signals: false,
        ..AppConfig::default()
    };
    let app = Arc::new(
        PayloadApplication::builder(cfg)
            .with_hardware(Hardware::new().with_uart(uart.clone()))
            .build(),
    );
    app.mount_sequence_with(
        "UARTLoopback",
        HandlerFn::arc(echo),
        SequenceOptions::default().with_timeout(Duration::from_secs(5)),
    )?;

    let started = Instant::now();
    let mut calls = Vec::new();
    for i in 0..4 {
        let app = Arc::clone(&app);
        calls.push(tokio::spawn(async move {
            let res = app
                .dispatch(InvocationRequest::new("UARTLoopback", format!("frame {i}")))
                .await;
            println!("[{:>4}ms] frame {i} -> {res:?}", started.elapsed().as_millis());
        }));
    }

    let doomed = RequestId::from_raw(900);
    let waiter = {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            app.dispatch(InvocationRequest::new("UARTLoopback", "never sent").with_request_id(doomed))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("[main] cancel {doomed}: {}", app.cancel(doomed));
    println!("[main] {doomed} -> {:?}", waiter.await?);

    for c in calls {
        c.await?;
    }

    println!(
        "[main] opens: {}, max simultaneously open: {}, stats: {:?}",
        uart.opened_total(),
        uart.max_concurrent_open(),
        app.stats()
    );
    Ok(())
}
