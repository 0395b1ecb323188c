//! 驱动端到端测试（内存串口，无硬件）
//!
//! 覆盖：状态发布、命令写入、关闭顺序、超时、断开、回放串行化与回调隔离。

use crossbeam_channel::{bounded, unbounded};
use roomba_sdk::driver::{ChannelEventHook, ConnectionFault, DeviceEvent, DriverError};
use roomba_sdk::protocol::{RobotFlags, SensorLayout, SensorPacketId, encode_stream_frame};
use roomba_sdk::serial::{MockHandle, MockSerialPort};
use roomba_sdk::{PipelineConfig, Roomba, RoombaBuilder};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn layout() -> SensorLayout {
    SensorLayout::new(&[
        SensorPacketId::BumpsWheelDrops,
        SensorPacketId::Wall,
        SensorPacketId::Buttons,
    ])
}

fn frame(bumps: u8, wall: u8, buttons: u8) -> Vec<u8> {
    encode_stream_frame(&[7, bumps, 8, wall, 18, buttons]).unwrap()
}

fn fast_config(inactivity_timeout_ms: u64) -> PipelineConfig {
    PipelineConfig {
        poll_interval_ms: 1,
        inactivity_timeout_ms,
        join_timeout_ms: 500,
    }
}

fn start(config: PipelineConfig) -> (Roomba, MockHandle) {
    let port = MockSerialPort::new();
    let handle = port.handle();
    let roomba = RoombaBuilder::new()
        .sensor_layout(layout())
        .pipeline_config(config)
        .song_number(2)
        .build_with_port(port)
        .unwrap();
    (roomba, handle)
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_stream_start_sequence() {
    let (roomba, handle) = start(fast_config(0));
    assert!(roomba.is_streaming());
    assert_eq!(
        handle.writes(),
        vec![vec![128], vec![132], vec![148, 3, 7, 8, 18]]
    );
}

#[test]
fn test_state_published_and_feed_advances() {
    let (roomba, handle) = start(fast_config(0));
    let mut feed = roomba.attach_feed();
    assert!(feed.poll_new().is_none());

    handle.inject(&frame(0x02, 0x01, 0));
    wait_until("first state", || roomba.read_state().is_some());

    let state = feed.poll_new().unwrap();
    assert!(state.flags.contains(RobotFlags::BUMP_LEFT | RobotFlags::WALL));
    assert!(feed.poll_new().is_none());

    handle.inject(&frame(0, 0, 0));
    wait_until("second state", || feed.sequence() == 2);
    let state = feed.poll_new().unwrap();
    assert!(state.flags.is_empty());

    let metrics = roomba.metrics();
    assert_eq!(metrics.frames_accepted, 2);
    assert_eq!(metrics.bytes_received, 18);
    assert_eq!(metrics.bump_events, 1);
    assert_eq!(metrics.checksum_errors, 0);
}

#[test]
fn test_chunked_delivery_through_port() {
    let (roomba, handle) = start(fast_config(0));
    let bytes = frame(0x01, 0, 0);

    handle.inject(&bytes[..1]);
    handle.inject(&bytes[1..2]);
    handle.inject(&bytes[2..8]);
    std::thread::sleep(Duration::from_millis(20));
    assert!(roomba.read_state().is_none());

    handle.inject(&bytes[8..]);
    wait_until("bump state", || roomba.read_state().is_some());
    assert!(roomba.read_state().unwrap().is_bumped());
    assert_eq!(roomba.metrics().bump_events, 1);
}

#[test]
fn test_bump_events_reach_channel_hook_once() {
    let (roomba, handle) = start(fast_config(0));
    let (hook, events) = ChannelEventHook::new();
    roomba.register_event_callback(Arc::new(hook));

    for bumps in [0x01, 0x01, 0x01, 0x00, 0x01] {
        handle.inject(&frame(bumps, 0, 0));
    }
    wait_until("all frames", || roomba.metrics().frames_accepted == 5);

    let bumps: Vec<DeviceEvent> = events.try_iter().collect();
    assert_eq!(bumps.len(), 2);
    assert!(
        bumps
            .iter()
            .all(|e| matches!(e, DeviceEvent::Bump { flags, .. } if flags.contains(RobotFlags::BUMP_RIGHT)))
    );
}

#[test]
fn test_commands_written_in_wire_format() {
    let (roomba, handle) = start(fast_config(0));
    handle.clear_written();

    roomba.drive(0.2, f64::INFINITY).unwrap();
    roomba.drive_direct(-0.1, 0.1).unwrap();
    roomba.stop().unwrap();

    assert_eq!(
        handle.writes(),
        vec![
            vec![137, 0x00, 0xC8, 0x80, 0x00],
            vec![145, 0xFF, 0x9C, 0x00, 0x64],
            vec![145, 0, 0, 0, 0],
        ]
    );
    assert_eq!(roomba.metrics().commands_written, 6);
}

#[test]
fn test_shutdown_order_and_idempotence() {
    let (mut roomba, handle) = start(fast_config(0));
    handle.clear_written();

    roomba.shutdown().unwrap();
    assert_eq!(handle.writes(), vec![vec![150, 0], vec![128]]);
    assert!(handle.is_closed());
    assert!(roomba.health().is_ok());

    roomba.shutdown().unwrap();
    assert_eq!(handle.writes().len(), 2);
    assert!(matches!(roomba.stop(), Err(DriverError::SinkClosed)));
}

#[test]
fn test_inactivity_timeout_is_fatal() {
    let (roomba, _handle) = start(fast_config(50));

    wait_until("inactivity fault", || roomba.health().is_err());
    match roomba.health() {
        Err(DriverError::Connection(ConnectionFault::InactivityTimeout { timeout_ms, .. })) => {
            assert_eq!(timeout_ms, 50)
        },
        other => panic!("unexpected health {:?}", other),
    }
}

#[test]
fn test_no_timeout_before_streaming() {
    let port = MockSerialPort::new();
    let roomba = RoombaBuilder::new()
        .sensor_layout(layout())
        .pipeline_config(fast_config(20))
        .auto_start(false)
        .build_with_port(port)
        .unwrap();

    std::thread::sleep(Duration::from_millis(80));
    assert!(roomba.health().is_ok());
}

#[test]
fn test_disconnect_records_read_fault() {
    let (roomba, handle) = start(fast_config(0));
    handle.disconnect();

    wait_until("read fault", || roomba.health().is_err());
    assert!(matches!(
        roomba.health(),
        Err(DriverError::Connection(ConnectionFault::Read(_)))
    ));
}

#[test]
fn test_layout_mismatch_is_fatal() {
    let (roomba, handle) = start(fast_config(0));
    handle.inject(&encode_stream_frame(&[7, 0x01]).unwrap());

    wait_until("decode fault", || roomba.health().is_err());
    assert!(matches!(
        roomba.health(),
        Err(DriverError::Connection(ConnectionFault::DecodeContract(_)))
    ));
    assert_eq!(roomba.metrics().decode_failures, 1);
}

#[test]
fn test_playback_is_serialized() {
    let (roomba, handle) = start(fast_config(0));
    let (release_tx, release_rx) = bounded::<()>(0);
    let (seen_tx, seen_rx) = unbounded();

    roomba.set_play_callback(move |distance: f64, angle: f64| -> Result<Vec<u8>, String> {
        seen_tx.send((distance, angle)).map_err(|e| e.to_string())?;
        release_rx.recv().map_err(|e| e.to_string())?;
        Ok(vec![60, 16, 64, 32])
    });
    handle.clear_written();

    handle.inject(&frame(0, 0, 0x01));
    seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(roomba.is_playing());

    // 回放进行中的第二次按下被丢弃
    handle.inject(&frame(0, 0, 0x00));
    handle.inject(&frame(0, 0, 0x01));
    wait_until("second press dropped", || roomba.metrics().playback_skipped == 1);
    assert!(roomba.is_playing());

    release_tx.send(()).unwrap();
    wait_until("playback done", || !roomba.is_playing());

    assert_eq!(
        handle.writes(),
        vec![vec![140, 2, 2, 60, 16, 64, 32], vec![141, 2]]
    );
    assert!(seen_rx.try_recv().is_err());
    let metrics = roomba.metrics();
    assert_eq!(metrics.playback_started, 1);
    assert_eq!(metrics.playback_failed, 0);
}

#[test]
fn test_shutdown_while_callback_blocked() {
    let (mut roomba, handle) = start(fast_config(0));
    let (release_tx, release_rx) = bounded::<()>(0);
    let (seen_tx, seen_rx) = unbounded();

    roomba.set_play_callback(move |_d: f64, _a: f64| -> Result<Vec<u8>, String> {
        seen_tx.send(()).map_err(|e| e.to_string())?;
        release_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|e| e.to_string())?;
        Ok(vec![60, 16])
    });
    handle.inject(&frame(0, 0, 0x01));
    seen_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    handle.clear_written();

    // 回调阻塞时关闭在 join 超时后返回，不等待回调
    let started = Instant::now();
    roomba.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(handle.writes(), vec![vec![150, 0], vec![128]]);
    assert!(handle.is_closed());

    // 被放弃的回放线程随后写入失败，不会在关闭后发出歌曲
    release_tx.send(()).unwrap();
    wait_until("late playback rejected", || roomba.metrics().playback_failed == 1);
    assert_eq!(handle.writes(), vec![vec![150, 0], vec![128]]);
    assert_eq!(roomba.metrics().playback_started, 1);
}

#[test]
fn test_callback_panic_is_isolated() {
    let (roomba, handle) = start(fast_config(0));
    roomba.set_play_callback(|_d: f64, _a: f64| -> Result<Vec<u8>, String> {
        panic!("callback bug")
    });
    handle.clear_written();

    handle.inject(&frame(0, 0, 0x01));
    wait_until("failed playback", || roomba.metrics().playback_failed == 1);
    wait_until("in-flight cleared", || !roomba.is_playing());
    assert!(handle.writes().is_empty());

    // 回调恢复后下一次按下正常回放
    roomba.set_play_callback(|_d: f64, _a: f64| -> Result<Vec<u8>, String> {
        Ok(vec![72, 8])
    });
    handle.inject(&frame(0, 0, 0x00));
    handle.inject(&frame(0, 0, 0x01));
    wait_until("song written", || handle.writes().len() == 2);

    assert_eq!(handle.writes(), vec![vec![140, 2, 1, 72, 8], vec![141, 2]]);
    assert!(roomba.health().is_ok());
}

#[test]
fn test_play_without_callback_does_nothing() {
    let (roomba, handle) = start(fast_config(0));
    handle.clear_written();

    handle.inject(&frame(0, 0, 0x01));
    wait_until("frame", || roomba.metrics().frames_accepted == 1);
    std::thread::sleep(Duration::from_millis(20));

    assert!(handle.writes().is_empty());
    assert_eq!(roomba.metrics().playback_started, 0);
}

#[test]
fn test_play_song_and_leds() {
    let (roomba, handle) = start(fast_config(0));
    handle.clear_written();

    roomba.play_song(3, &[60, 10]).unwrap();
    assert!(matches!(
        roomba.play_song(3, &[60]),
        Err(DriverError::Protocol(_))
    ));

    assert_eq!(handle.writes(), vec![vec![140, 3, 1, 60, 10], vec![141, 3]]);
}
