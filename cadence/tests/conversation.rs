/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Drives the `cadence` binary over its stdio packet protocol.

use std::time::Duration;

use cadence::harness::{ConversationProcess, HarnessConfig};
use cadence::{CommandResponse, Packet};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn config(example: u16) -> HarnessConfig {
    let mut config = HarnessConfig::new(env!("CARGO_BIN_EXE_cadence"));
    config.example = example;
    config.settle = Duration::from_millis(400);
    config
}

#[tokio::test]
async fn status_then_exit_passes() {
    let process = ConversationProcess::new(config(0));
    let report = process
        .run(vec![CommandResponse::new(
            Packet::status(""),
            Packet::status(VERSION),
        )])
        .await
        .unwrap();

    assert_eq!(report.preamble, "Cadence - Example 0000");
    assert!(report.steps[0].is_complete());
    assert!(report.passed(), "{report:?}");
}

#[tokio::test]
async fn wrong_expectation_fails_only_that_step() {
    let process = ConversationProcess::new(config(0));
    let report = process
        .run(vec![
            CommandResponse::new(Packet::status(""), Packet::status("0.0.0-never")),
            CommandResponse::new(Packet::status(""), Packet::status(VERSION)),
        ])
        .await
        .unwrap();

    assert!(!report.steps[0].response_matches());
    assert!(report.steps[1].response_matches());
    assert!(report.exit_acknowledged);
    assert!(report.exit_status.success());
    assert!(!report.passed());
}

#[tokio::test]
async fn faulty_sensor_example_still_exits_on_request() {
    let process = ConversationProcess::new(config(1));
    let report = process.run(Vec::new()).await.unwrap();

    assert_eq!(report.preamble, "Cadence - Example 0001");
    assert!(report.exit_acknowledged);
}
