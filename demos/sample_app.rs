//! # Example: sample_app
//!
//! The bring-up application for a payload computer: eight sequences exercising
//! the controller client, GPIO, UART and CAN, a health predicate and a set of
//! telemetry counters. Hardware is simulated (loopback wiring) and ground
//! requests come from a [`ScriptedTransport`].
//!
//! ## Flow
//! ```text
//! main()
//!   ├─► init_logging (DEBUG=1 for debug level)
//!   ├─► new_app()
//!   │     ├─► set_health_check
//!   │     ├─► init_metrics  (5 counters, "MetricName_1")
//!   │     └─► mount_sequence × 8
//!   └─► app.run()
//!         ├─► scripted steps ──► dispatch ──► handlers
//!         └─► transport finished ──► drain ──► exit 0
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example sample_app
//! DEBUG=1 PAYLOAD_OUTBOUND_DIR=/tmp cargo run --example sample_app
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use payloadvisor::peripherals::drivers::PowerState;
use payloadvisor::peripherals::{loopback_pairs, CanFrame, Hardware};
use payloadvisor::sim::{LoopbackCan, LoopbackGpio, LoopbackUart, SimClient};
use payloadvisor::{
    init_logging, AppConfig, ExecutionContext, HandlerFn, HealthFn, LogConfig, LogWriter,
    MetricsRegistry, PayloadApplication, ScriptedTransport, SequenceError,
    SequenceOutput, Step,
};

const DEFAULT_OUTBOUND_DIR: &str = "/opt/antaris/outbound/";
const STAGE_FILE_NAME: &str = "SampleFile.txt";
const UART_DEFAULT: &str = "Default string: Uart Tested working";
const CAN_SEND_COUNT: u32 = 10;

type SeqResult = Result<SequenceOutput, SequenceError>;

async fn hello_world(_ctx: ExecutionContext) -> SeqResult {
    tracing::info!("hello, world!");
    Ok(SequenceOutput::done())
}

async fn hello_friend(ctx: ExecutionContext) -> SeqResult {
    let name = ctx.params_str()?;
    tracing::info!("hello, {name}!");
    Ok(SequenceOutput::text(format!("hello, {name}")))
}

async fn log_location(ctx: ExecutionContext) -> SeqResult {
    let loc = ctx.client().get_current_location().await?;
    tracing::info!(lat = loc.latitude, lng = loc.longitude, alt = loc.altitude, "current location");
    Ok(SequenceOutput::text(format!("{:.4},{:.4},{:.1}", loc.latitude, loc.longitude, loc.altitude)))
}

async fn power_control(ctx: ExecutionContext) -> SeqResult {
    let raw = ctx.params_str()?;
    let state = raw
        .parse::<u8>()
        .ok()
        .and_then(|v| PowerState::try_from(v).ok())
        .ok_or_else(|| SequenceError::InvalidParams {
            reason: format!("power state must be 0 or 1, got {raw:?}"),
        })?;
    let resp = ctx.client().payload_power_control(state).await?;
    tracing::info!(?state, code = resp.code, "power control requested");
    Ok(SequenceOutput::text(format!("power {state:?}: {}", resp.code)))
}

/// Pins are wired back-to-back: toggle the write pin, the read pin must follow.
async fn test_gpio(ctx: ExecutionContext) -> SeqResult {
    let gpio = ctx.gpio()?;
    let info = gpio.info().await?;
    tracing::info!(pin_count = info.pin_count, "gpio pins");

    let pairs = loopback_pairs(&info);
    for &(read_pin, write_pin) in &pairs {
        let pins = gpio.claim(&[read_pin, write_pin]).await?;
        let initial = pins.read(read_pin).await?;
        tracing::debug!(pin = read_pin, level = ?initial, "initial level");

        let written = pins.write(write_pin, initial.toggled()).await?;
        tracing::debug!(pin = write_pin, level = ?written, "written");

        let after = pins.read(read_pin).await?;
        if after != initial.toggled() {
            return Err(SequenceError::failed(format!(
                "pin {read_pin} reads {after:?} after writing {written:?} to pin {write_pin}"
            )));
        }
    }
    Ok(SequenceOutput::text(format!("{} pin pairs ok", pairs.len())))
}

/// TX is looped to RX: what goes out must come back.
async fn uart_loopback(ctx: ExecutionContext) -> SeqResult {
    let mut data = ctx.params_str()?.to_string();
    if data.is_empty() {
        tracing::info!("empty input, using default string");
        data = UART_DEFAULT.to_string();
    }
    data.push('\n');

    let port = ctx.uart()?.open_first().await?;
    tracing::debug!(port = port.name(), "writing");
    port.write(data.as_bytes()).await?;
    let echoed = port.read_line().await?;
    port.close();

    let echoed = String::from_utf8_lossy(&echoed);
    tracing::info!(data = %echoed.trim_end(), "uart read");
    Ok(SequenceOutput::text(echoed.trim_end()))
}

fn outbound_dir() -> PathBuf {
    std::env::var_os("PAYLOAD_OUTBOUND_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTBOUND_DIR))
}

/// Files must be in the outbound directory before they can be staged.
async fn stage_file(ctx: ExecutionContext) -> SeqResult {
    let path = outbound_dir().join(STAGE_FILE_NAME);
    tracing::info!(path = %path.display(), "staging file for download");
    tokio::fs::write(&path, "Testing file download with payload").await?;

    let resp = ctx.client().stage_file_download(STAGE_FILE_NAME).await?;
    Ok(SequenceOutput::text(format!("staged {STAGE_FILE_NAME}: {}", resp.code)))
}

async fn test_can_bus(ctx: ExecutionContext) -> SeqResult {
    let frame = match ctx.params_str()?.parse::<CanFrame>() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::info!(error = %e, "expected \"<arbitration id> <byte>,<byte>,...\", using default frame");
            CanFrame::default()
        }
    };

    let bus = ctx.can()?.open_first().await?;
    tracing::info!(channel = bus.channel(), "can receiver started");

    for i in 1..=CAN_SEND_COUNT {
        bus.send(&frame.with_id_offset(i)).await?;
        ctx.sleep(Duration::from_millis(100)).await?;
    }

    let pending = bus.wait_for(CAN_SEND_COUNT as usize, Duration::from_secs(1)).await?;
    tracing::info!(pending, "frames received");
    let frames = bus.drain().await?;
    for data in &frames {
        tracing::debug!(?data, "received");
    }
    Ok(SequenceOutput::text(format!("sent {CAN_SEND_COUNT}, received {}", frames.len())))
}

fn init_metrics(metrics: &MetricsRegistry) -> Result<(), SequenceError> {
    metrics.set_used(5)?;
    for i in 0..5 {
        metrics.set_counter(i, i as u64 + 1)?;
    }
    metrics.define_counter(1, "MetricName_1")?;
    metrics.inc_counter(1)?;
    Ok(())
}

fn new_app(transport: ScriptedTransport) -> anyhow::Result<PayloadApplication> {
    let hardware = Hardware::new()
        .with_client(SimClient::arc())
        .with_gpio(LoopbackGpio::arc(&[4, 5, 6, 7]))
        .with_uart(std::sync::Arc::new(
            LoopbackUart::new(&["/dev/ttyUSB0"]).with_read_delay(Duration::from_millis(50)),
        ))
        .with_can(LoopbackCan::arc(&["can0"]));

    let app = PayloadApplication::builder(AppConfig::from_env())
        .with_hardware(hardware)
        .with_subscriber(std::sync::Arc::new(LogWriter::new()))
        .with_transport(transport)
        .build();

    app.set_health_check(HealthFn::arc(|| {
        tracing::info!("health check succeeded");
        true
    }))?;
    init_metrics(app.metrics())?;

    // Sequence names are at most 16 characters.
    app.mount_sequence("HelloWorld", HandlerFn::arc(hello_world))?;
    app.mount_sequence("HelloFriend", HandlerFn::arc(hello_friend))?;
    app.mount_sequence("LogLocation", HandlerFn::arc(log_location))?;
    app.mount_sequence("TestGPIO", HandlerFn::arc(test_gpio))?;
    app.mount_sequence("UARTLoopback", HandlerFn::arc(uart_loopback))?;
    app.mount_sequence("StageFile", HandlerFn::arc(stage_file))?;
    app.mount_sequence("PowerControl", HandlerFn::arc(power_control))?;
    app.mount_sequence("TestCANBus", HandlerFn::arc(test_can_bus))?;
    Ok(app)
}

fn script() -> Vec<Step> {
    vec![
        Step::CheckHealth,
        Step::invoke("HelloWorld", ""),
        Step::invoke("HelloFriend", "ground station"),
        Step::invoke("LogLocation", ""),
        Step::invoke("PowerControl", "1"),
        Step::invoke("TestGPIO", ""),
        Step::spawn("UARTLoopback", ""),
        Step::spawn("UARTLoopback", "second frame"),
        Step::invoke("TestCANBus", "0x200 0x01,0x02,0x03"),
        Step::invoke("TestCANBus", "not a frame"),
        Step::invoke("StageFile", ""),
        Step::invoke("Unknown", ""),
        Step::ExportMetrics,
        Step::Pause(Duration::from_millis(200)),
        Step::CheckHealth,
    ]
}

async fn run() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new(script());
    let outcomes = transport.outcome_log();
    let app = new_app(transport)?;

    let result = app.run().await;

    let failed = outcomes
        .lock()
        .map(|o| o.iter().filter(|s| s.result.is_err()).count())
        .unwrap_or(0);
    let stats = app.stats();
    tracing::info!(
        dispatched = stats.dispatched,
        completed = stats.completed,
        failed,
        "script finished"
    );

    result.context("payload application run")
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging(&LogConfig::from_env()) {
        eprintln!("logging: {e}");
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "payload app failed");
            ExitCode::from(1)
        }
    }
}
