// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! End-to-end board <-> simulator exercises over a real seqpacket link.
//!
//! A fake simulator runs on a thread at the other end of an abstract
//! socket: it performs the handshake, feeds sensor messages in, and captures
//! the actuator messages the board exports on I2C STOP.

use robowired_core::board::{Board, Dev};
use robowired_core::bridge::proto::{GuestState, InboundMessage, OutboundMessage};
use robowired_core::bridge::socket::SeqPacketConn;
use robowired_core::peripherals::{i2c, timer};
use std::sync::mpsc;
use std::time::Duration;

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

struct FakeSimulator {
    conn: SeqPacketConn,
}

impl FakeSimulator {
    /// Bind the address and wait for the board to connect, then greet it.
    fn serve(path: &str) -> Self {
        let conn = SeqPacketConn::open(path).expect("simulator socket");
        conn.send(b"hello robowired").expect("handshake");
        Self { conn }
    }

    fn send(&self, msg: &InboundMessage) {
        self.conn.send(&msg.encode()).expect("inbound send");
    }

    fn recv_outbound(&self) -> Option<OutboundMessage> {
        let mut buf = [0u8; 64];
        let n = self.conn.recv(&mut buf).ok()??;
        OutboundMessage::decode(&buf[..n])
    }
}

fn running_message(encoder: i64) -> InboundMessage {
    InboundMessage {
        state: GuestState::Running,
        more_lines: true,
        one_line: false,
        front: [11.5, 12.5, 13.5, 14.5],
        mid: [21.0, 22.0, 23.0, 24.0],
        aux_distance: 99.0,
        encoder,
    }
}

#[test]
fn test_duplex_sensor_and_actuator_flow() {
    let path = format!("@/robowired/test-duplex-{}", std::process::id());

    let (out_tx, out_rx) = mpsc::channel();
    let sim_path = path.clone();
    let sim = std::thread::spawn(move || {
        let sim = FakeSimulator::serve(&sim_path);

        // Wait for the board's configuration cue (an empty transaction)
        // before feeding real data, then pace the link with a keep-alive
        // and send one sensor sweep.
        let cue = sim.recv_outbound().expect("configuration cue");
        assert_eq!(cue.motor_power, 0.0);
        sim.send(&InboundMessage {
            state: GuestState::Waiting,
            ..Default::default()
        });
        sim.send(&running_message(100));

        // The board's next STOP condition exports the actuator state.
        if let Some(out) = sim.recv_outbound() {
            out_tx.send(out).expect("report outbound");
        }

        // Orderly teardown.
        sim.send(&InboundMessage {
            state: GuestState::Shutdown,
            ..Default::default()
        });
    });

    // The simulator owns the address; the board falls back to client role.
    std::thread::sleep(Duration::from_millis(50));
    let board = Board::start(&path).expect("board start");

    // Give the encoder a reload range and park the servos.
    board.write(Dev::Tim2, timer::ARR, 1_000, 4);
    board.write(Dev::Tim3, timer::CCR1, 12_000, 4); // full-right front servo
    board.write(Dev::Tim4, timer::CCR1, 11_000, 4);
    board.write(Dev::Tim5, timer::CCR1, 14_141, 4);

    // Empty transaction: tells the simulator the board is configured.
    // Control writes carry fresh values so START/STOP make real 0-to-1
    // transitions on every transaction.
    board.write(Dev::I2c2, i2c::CR2, i2c::Cr2::ITEVTEN.bits() as u64, 4);
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::START.bits() as u64, 4);
    board.write(Dev::I2c2, i2c::DR, 0x42, 4);
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::STOP.bits() as u64, 4);

    // The Running message lands asynchronously: encoder delta applied to
    // TIM2 and the sensor record buffered for I2C.
    assert!(wait_until(|| {
        board
            .with_soc(|soc| soc.tim[0].raw_count() == 100)
            .unwrap_or(false)
    }));

    // Guest-side receive sequence drains the buffered sensor record.
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::START.bits() as u64, 4);
    board.write(Dev::I2c2, i2c::DR, 0x43, 4);
    board.read(Dev::I2c2, i2c::SR1, 4);
    board.read(Dev::I2c2, i2c::SR2, 4);

    let mut record = Vec::new();
    for _ in 0..20 {
        record.push(board.read(Dev::I2c2, i2c::DR, 4) as u8);
    }
    let text = String::from_utf8_lossy(&record);
    assert!(
        text.starts_with("1,0,11.500,12.500"),
        "unexpected record: {}",
        text
    );

    // Guest-side transmit transaction: motor power out, STOP exports it.
    board.advance(5_000);
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::START.bits() as u64, 4);
    board.write(Dev::I2c2, i2c::DR, 0x42, 4);
    for b in b"0.75" {
        board.write(Dev::I2c2, i2c::DR, *b as u64, 4);
    }
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::STOP.bits() as u64, 4);

    let out = out_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("outbound message");
    assert_eq!(out.motor_power, 0.75);
    assert_eq!(out.virtual_time_ns, 5_000);
    assert!((out.fwd_steering_wheel_angle - 32.5).abs() < 1e-9);
    assert_eq!(out.rev_steering_wheel_angle, 0.0);
    assert_eq!(out.distance_rotation_angle, 0.0);

    // The Shutdown message surfaces as a power-down request.
    assert!(wait_until(|| board.shutdown_requested()));

    board.stop();
    sim.join().expect("simulator thread");
}

#[test]
fn test_link_fault_surfaces_as_shutdown_request() {
    let path = format!("@/robowired/test-fault-{}", std::process::id());

    let sim_path = path.clone();
    let sim = std::thread::spawn(move || {
        let sim = FakeSimulator::serve(&sim_path);
        sim.send(&running_message(0));
        // Drop the connection without an orderly Shutdown message.
    });

    std::thread::sleep(Duration::from_millis(50));
    let board = Board::start(&path).expect("board start");
    sim.join().expect("simulator thread");

    assert!(wait_until(|| board.shutdown_requested()));
    board.stop();
}

#[test]
fn test_board_start_fails_without_simulator() {
    // Nothing listens and nothing can be bound to a clearly-invalid
    // address: open must fail rather than hang or fake a link.
    let too_long = format!("@/robowired/{}", "x".repeat(150));
    assert!(Board::start(&too_long).is_err());
}
