use std::sync::{Arc, Mutex};
use std::time::Duration;

use payloadvisor::peripherals::drivers::PowerState;
use payloadvisor::peripherals::{loopback_pairs, CanFrame, Gpio, Hardware, Level};
use payloadvisor::sim::{LoopbackCan, LoopbackGpio, LoopbackUart, SimClient};
use payloadvisor::{
    AppBuilder, DispatchError, ExecutionContext, HandlerFn, HandlerRef, InvocationRequest,
    PayloadApplication, PeripheralError, RequestId, SequenceError, SequenceOptions,
};

mod common;
use common::quiet_config;

fn uart_echo() -> HandlerRef {
    HandlerFn::arc(|ctx: ExecutionContext| async move {
        let session = ctx.uart()?.open_first().await?;
        let line = format!("{}\n", ctx.params_str()?);
        session.write(line.as_bytes()).await?;
        let echoed = session.read_line().await?;
        Ok::<_, SequenceError>(String::from_utf8_lossy(&echoed).trim_end().to_string())
    })
}

fn app_with(hardware: Hardware) -> Arc<PayloadApplication> {
    Arc::new(
        AppBuilder::new(quiet_config())
            .with_hardware(hardware)
            .build(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_read_releases_the_port() {
    let uart = Arc::new(LoopbackUart::new(&["/dev/ttyS1"]).with_silent_line());
    let app = app_with(Hardware::new().with_uart(uart.clone()));
    app.mount_sequence_with(
        "UARTLoopback",
        uart_echo(),
        SequenceOptions::default().with_timeout(Duration::from_millis(100)),
    )
    .unwrap();

    for attempt in 1..=2 {
        let out = tokio::time::timeout(
            Duration::from_secs(2),
            app.dispatch(InvocationRequest::new("UARTLoopback", "no echo")),
        )
        .await
        .expect("dispatch must not hang on a blocked port");
        assert!(matches!(out, Err(DispatchError::Timeout { .. })), "{out:?}");
        assert_eq!(uart.opened_total(), attempt);
    }

    let closed = async {
        while uart.open_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), closed)
        .await
        .expect("interrupted port is closed");
    assert_eq!(uart.max_concurrent_open(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_uart_is_never_held_twice() {
    let uart = Arc::new(LoopbackUart::new(&["/dev/ttyS1"]).with_read_delay(Duration::from_millis(30)));
    let app = app_with(Hardware::new().with_uart(uart.clone()));
    app.mount_sequence("UARTLoopback", uart_echo()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let msg = format!("frame {i}");
                let out = app
                    .dispatch(InvocationRequest::new("UARTLoopback", msg.as_str()))
                    .await;
                (msg, out)
            })
        })
        .collect();

    for h in handles {
        let (msg, out) = h.await.unwrap();
        assert_eq!(out.unwrap().message(), Some(msg.as_str()));
    }
    assert_eq!(uart.max_concurrent_open(), 1);
    assert_eq!(uart.opened_total(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiting_for_a_busy_port_is_cancellable() {
    let uart = Arc::new(LoopbackUart::new(&["/dev/ttyS1"]).with_read_delay(Duration::from_millis(400)));
    let app = app_with(Hardware::new().with_uart(uart.clone()));
    app.mount_sequence("UARTLoopback", uart_echo()).unwrap();

    let holder = {
        let app = app.clone();
        tokio::spawn(async move { app.dispatch(InvocationRequest::new("UARTLoopback", "hold")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = RequestId::from_raw(9_100_001);
    let waiter = {
        let app = app.clone();
        tokio::spawn(async move {
            app.dispatch(InvocationRequest::new("UARTLoopback", "wait").with_request_id(id))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.cancel(id));

    assert_eq!(waiter.await.unwrap(), Err(DispatchError::Cancelled { request_id: id }));
    assert_eq!(holder.await.unwrap().unwrap().message(), Some("hold"));
    assert_eq!(uart.opened_total(), 1);
}

#[tokio::test]
async fn gpio_pairs_loop_back() {
    let gpio = LoopbackGpio::arc(&[4, 5, 6, 7]);
    let app = app_with(Hardware::new().with_gpio(gpio.clone()));
    app.mount_sequence(
        "TestGPIO",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            let gpio = ctx.gpio()?;
            let info = gpio.info().await?;
            let mut tested = 0;
            for (read_pin, write_pin) in loopback_pairs(&info) {
                let pins = gpio.claim(&[read_pin, write_pin]).await?;
                let before = pins.read(read_pin).await?;
                pins.write(write_pin, before.toggled()).await?;
                if pins.read(read_pin).await? != before.toggled() {
                    return Err(SequenceError::failed(format!("pin {read_pin} did not follow {write_pin}")));
                }
                tested += 1;
            }
            Ok::<_, SequenceError>(format!("{tested} pairs"))
        }),
    )
    .unwrap();

    let out = app.dispatch(InvocationRequest::new("TestGPIO", "")).await.unwrap();
    assert_eq!(out.message(), Some("2 pairs"));
    assert_eq!(gpio.level(4), Some(1));
    assert_eq!(gpio.level(6), Some(1));
}

#[tokio::test]
async fn gpio_sentinel_surfaces_as_io_error() {
    let gpio = LoopbackGpio::arc(&[4, 5]);
    gpio.fail_pin(5);
    let app = app_with(Hardware::new().with_gpio(gpio));
    app.mount_sequence(
        "TestGPIO",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            let pins = ctx.gpio()?.claim(&[4, 5]).await?;
            pins.write(5, Level::High).await?;
            Ok::<_, SequenceError>(())
        }),
    )
    .unwrap();

    match app.dispatch(InvocationRequest::new("TestGPIO", "")).await {
        Err(DispatchError::Failed { error, .. }) => {
            assert_eq!(
                error,
                SequenceError::Peripheral(PeripheralError::Io {
                    class: "gpio",
                    op: "write",
                    device: "pin 5".into(),
                    code: -1,
                })
            );
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn can_frames_loop_back() {
    let can = LoopbackCan::arc(&["can0"]);
    let app = app_with(Hardware::new().with_can(can.clone()));
    app.mount_sequence(
        "TestCANBus",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            let frame: CanFrame = ctx.params_str()?.parse().unwrap_or_default();
            let session = ctx.can()?.open_first().await?;
            for i in 0..3 {
                session.send(&frame.with_id_offset(i)).await?;
            }
            let pending = session.wait_for(3, Duration::from_secs(1)).await?;
            let frames = session.drain().await?;
            Ok::<_, SequenceError>(format!("{pending}/{}/{:02x?}", frames.len(), &frames[2][..4]))
        }),
    )
    .unwrap();

    let out = app
        .dispatch(InvocationRequest::new("TestCANBus", "0x200 0x01,0x02"))
        .await
        .unwrap();
    assert_eq!(out.message(), Some("3/3/[00, 00, 02, 02]"));
    assert_eq!(can.sent(), 3);

    // Malformed params fall back to the default frame.
    app.dispatch(InvocationRequest::new("TestCANBus", "garbage"))
        .await
        .unwrap();
    assert_eq!(can.sent(), 6);
}

#[tokio::test]
async fn leaked_handles_expire_with_the_invocation() {
    let app = app_with(Hardware::new().with_gpio(LoopbackGpio::arc(&[4, 5])));
    let leaked: Arc<Mutex<Option<Gpio>>> = Arc::default();
    let slot = leaked.clone();
    app.mount_sequence(
        "TestGPIO",
        HandlerFn::arc(move |ctx: ExecutionContext| {
            let slot = slot.clone();
            async move {
                *slot.lock().unwrap() = Some(ctx.gpio()?);
                Ok::<_, SequenceError>(())
            }
        }),
    )
    .unwrap();

    app.dispatch(InvocationRequest::new("TestGPIO", "")).await.unwrap();
    let gpio = leaked.lock().unwrap().take().unwrap();
    assert_eq!(gpio.info().await.err(), Some(PeripheralError::ContextExpired));
}

#[tokio::test]
async fn client_calls_reach_the_controller() {
    let client = SimClient::arc();
    let app = app_with(Hardware::new().with_client(client.clone()));
    app.mount_sequence(
        "PowerControl",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            let state = match ctx.params_str()? {
                "off" => PowerState::Off,
                _ => PowerState::On,
            };
            let resp = ctx.client().payload_power_control(state).await?;
            let here = ctx.client().get_current_location().await?;
            Ok::<_, SequenceError>(format!("{} {:.2}", resp.code, here.latitude))
        }),
    )
    .unwrap();

    let out = app
        .dispatch(InvocationRequest::new("PowerControl", "off"))
        .await
        .unwrap();
    assert_eq!(out.message(), Some("0 12.97"));
    assert_eq!(client.power_requests(), vec![PowerState::Off]);
}

#[tokio::test]
async fn missing_client_is_unavailable() {
    let app = PayloadApplication::new(quiet_config());
    app.mount_sequence(
        "LogLocation",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            ctx.client().get_current_location().await?;
            Ok::<_, SequenceError>(())
        }),
    )
    .unwrap();

    let err = app
        .dispatch(InvocationRequest::new("LogLocation", ""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Failed {
            error: SequenceError::Peripheral(PeripheralError::Unavailable { class: "client" }),
            ..
        }
    ));
}
