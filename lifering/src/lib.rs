/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! LifeRing – distributed toroidal Game of Life
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── proto/          – generated gRPC/protobuf types & stubs
//! ├── config/         – YAML broker configuration
//! ├── world/          – WorldGrid, cell wire format, B3/S23 update rule
//! ├── partition       – row-band split across the worker ring
//! ├── halo            – initial halos and the ring exchange
//! ├── handoff         – generation-indexed single-slot handoff
//! ├── control         – pause/resume commands and the run gate
//! ├── wire            – domain ⇄ proto conversions
//! ├── node/           – WorkerNode and its NodeService
//! └── broker/         – Broker, node links, telemetry fan-in, BrokerService
//! ```

pub mod broker;
pub mod config;
pub mod control;
pub mod halo;
pub mod handoff;
pub mod node;
pub mod partition;
pub mod proto;
pub mod wire;
pub mod world;
