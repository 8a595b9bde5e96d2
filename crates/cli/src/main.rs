// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Bring-up and soak harness for the board model.
//!
//! Connects to the simulator socket, advances virtual time on a fixed
//! cadence and, optionally, drives a scripted I2C motor-power transaction so
//! the outbound path can be exercised without firmware. Runs until the
//! simulator requests a shutdown, the link faults, or `--max-steps` is hit.

use anyhow::Context;
use clap::Parser;
use robowired_core::board::{Board, Dev};
use robowired_core::bridge::SOCKET_PATH;
use robowired_core::peripherals::{i2c, timer};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

const EXIT_PASS: u8 = 0;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "RoboWired board bring-up harness", long_about = None)]
struct Cli {
    /// Virtual-time step per iteration, microseconds
    #[arg(long, default_value = "1000")]
    step_us: u64,

    /// Wall-clock pacing between iterations, milliseconds (0 = free-running)
    #[arg(long, default_value = "10")]
    pace_ms: u64,

    /// Stop after this many iterations (0 = run until shutdown)
    #[arg(long, default_value = "0")]
    max_steps: u64,

    /// Drive a scripted I2C motor-power transaction every N iterations
    /// (0 = disabled)
    #[arg(long, default_value = "0")]
    demo_every: u64,

    /// Motor power ratio sent by the scripted transaction
    #[arg(long, default_value = "0.25")]
    demo_power: f64,

    /// Write a JSON state snapshot to this path on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Enable verbose execution tracing
    #[arg(short, long)]
    trace: bool,
}

/// Park the servos at their center duty cycles and give the encoder timer a
/// reload range, so demo transactions export meaningful actuator state.
fn park_actuators(board: &Board) {
    board.write(Dev::Tim3, timer::CCR1, 9_000, 4);
    board.write(Dev::Tim4, timer::CCR1, 11_000, 4);
    board.write(Dev::Tim5, timer::CCR1, 14_141, 4);
    board.write(Dev::Tim2, timer::ARR, 1_000, 4);
}

/// One full master-transmit transaction carrying the motor power as text,
/// the same register sequence the firmware issues. Control writes carry
/// fresh values so the START/STOP bits make a real 0-to-1 transition each
/// time.
fn demo_transaction(board: &Board, power: f64) {
    board.write(Dev::I2c2, i2c::CR2, i2c::Cr2::ITEVTEN.bits() as u64, 4);
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::START.bits() as u64, 4);
    board.write(Dev::I2c2, i2c::DR, 0x42, 4);
    for byte in format!("{:.2}", power).bytes() {
        board.write(Dev::I2c2, i2c::DR, byte as u64, 4);
    }
    board.write(Dev::I2c2, i2c::CR1, i2c::Cr1::STOP.bits() as u64, 4);
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let board = Board::start(SOCKET_PATH)
        .with_context(|| format!("simulator connection on {} failed", SOCKET_PATH))?;
    info!("board up, link role {:?}", board.link_role());

    park_actuators(&board);

    let mut steps = 0u64;
    while !board.shutdown_requested() {
        steps += 1;
        board.advance(cli.step_us * 1_000);

        if cli.demo_every != 0 && steps % cli.demo_every == 0 {
            demo_transaction(&board, cli.demo_power);
        }

        if cli.pace_ms != 0 {
            std::thread::sleep(std::time::Duration::from_millis(cli.pace_ms));
        }
        if cli.max_steps != 0 && steps >= cli.max_steps {
            info!("step limit reached");
            break;
        }
    }

    if board.shutdown_requested() {
        info!("shutdown requested after {} steps", steps);
    }

    if let Some(path) = &cli.snapshot {
        let snap = board.snapshot();
        let text = serde_json::to_string_pretty(&snap).context("serializing snapshot")?;
        std::fs::write(path, text)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
        info!("snapshot written to {}", path.display());
    }

    board.stop();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match run(&cli) {
        Ok(()) => ExitCode::from(EXIT_PASS),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}
