/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Broker → node links.
//!
//! [`NodeLink`] is the one seam between run orchestration and transport:
//!
//! | Implementation | Transport |
//! |---|---|
//! | [`GrpcNodeLink`] | tonic client over a `Channel` |
//! | [`LocalNodeLink`] | direct calls on an in-process [`WorkerNode`] |
//!
//! Artifact pulls return the generation the node reports alongside the data
//! so the broker can verify it against the generation it asked for.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::broker::error::LinkError;
use crate::control::Command;
use crate::halo::HaloPair;
use crate::node::service::assignment_to_proto;
use crate::node::{PauseAck, SliceAssignment, WorkerNode};
use crate::proto::lifering_v1 as pb;
use crate::proto::lifering_v1::node_service_client::NodeServiceClient;
use crate::wire::{cells_from_proto, halo_from_proto, halo_to_proto};
use crate::world::{CellPos, WorldGrid};

#[tonic::async_trait]
pub trait NodeLink: Send + Sync {
    /// Address the link was dialled with; used in logs and errors.
    fn addr(&self) -> &str;

    /// Run the whole slice; resolves with the final band.
    async fn process_slice(&self, assignment: SliceAssignment) -> Result<WorldGrid, LinkError>;

    async fn flipped_cells(&self, turn: u32) -> Result<(u32, Vec<CellPos>), LinkError>;

    async fn turn_and_alive(&self, turn: u32) -> Result<(u32, u64), LinkError>;

    async fn halo_export(&self, turn: u32) -> Result<(u32, HaloPair), LinkError>;

    async fn deliver_halo(&self, turn: u32, halo: HaloPair) -> Result<(), LinkError>;

    async fn pause_and_resume(&self, command: Command) -> Result<PauseAck, LinkError>;

    async fn shutdown(&self) -> Result<(), LinkError>;
}

/// Dials worker addresses.
#[tonic::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn NodeLink>, LinkError>;
}

// ── gRPC ──────────────────────────────────────────────────────────────────────

pub struct GrpcConnector {
    connect_timeout: Duration,
    max_message_bytes: usize,
}

impl GrpcConnector {
    pub fn new(connect_timeout: Duration, max_message_bytes: usize) -> Self {
        Self {
            connect_timeout,
            max_message_bytes,
        }
    }
}

#[tonic::async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn NodeLink>, LinkError> {
        let connect_err = |reason: String| LinkError::Connect {
            addr: addr.to_string(),
            reason,
        };

        let uri = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{addr}")
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| connect_err(e.to_string()))?
            .connect_timeout(self.connect_timeout);

        let channel = tokio::time::timeout(self.connect_timeout, endpoint.connect())
            .await
            .map_err(|_| connect_err(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connect_err(e.to_string()))?;

        debug!(worker = %addr, "Connected to worker");

        let client = NodeServiceClient::new(channel)
            .max_decoding_message_size(self.max_message_bytes)
            .max_encoding_message_size(self.max_message_bytes);
        Ok(Arc::new(GrpcNodeLink {
            addr: addr.to_string(),
            client,
        }))
    }
}

pub struct GrpcNodeLink {
    addr: String,
    client: NodeServiceClient<Channel>,
}

impl GrpcNodeLink {
    /// `NodeServiceClient` methods take `&mut self`; clones share the channel.
    fn client(&self) -> NodeServiceClient<Channel> {
        self.client.clone()
    }

    fn rpc_err(&self, call: &'static str) -> impl FnOnce(tonic::Status) -> LinkError + '_ {
        move |status| LinkError::Rpc {
            addr: self.addr.clone(),
            call,
            status,
        }
    }

    fn decode_err(&self) -> impl FnOnce(crate::world::GridError) -> LinkError + '_ {
        move |source| LinkError::Decode {
            addr: self.addr.clone(),
            source,
        }
    }
}

#[tonic::async_trait]
impl NodeLink for GrpcNodeLink {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn process_slice(&self, assignment: SliceAssignment) -> Result<WorldGrid, LinkError> {
        let width = assignment.band.width();
        let request = assignment_to_proto(&assignment);
        let response = self
            .client()
            .process_slice(request)
            .await
            .map_err(self.rpc_err("ProcessSlice"))?
            .into_inner();
        WorldGrid::from_wire_rows(&response.band, width).map_err(self.decode_err())
    }

    async fn flipped_cells(&self, turn: u32) -> Result<(u32, Vec<CellPos>), LinkError> {
        let response = self
            .client()
            .get_flipped_cells(pb::ArtifactRequest { turn })
            .await
            .map_err(self.rpc_err("GetFlippedCells"))?
            .into_inner();
        Ok((response.turn, cells_from_proto(&response.cells)))
    }

    async fn turn_and_alive(&self, turn: u32) -> Result<(u32, u64), LinkError> {
        let response = self
            .client()
            .get_turn_and_alive_cell(pb::ArtifactRequest { turn })
            .await
            .map_err(self.rpc_err("GetTurnAndAliveCell"))?
            .into_inner();
        Ok((response.turn, response.alive))
    }

    async fn halo_export(&self, turn: u32) -> Result<(u32, HaloPair), LinkError> {
        let response = self
            .client()
            .send_halo_to_broker(pb::ArtifactRequest { turn })
            .await
            .map_err(self.rpc_err("SendHaloToBroker"))?
            .into_inner();
        // Width is checked against the world by the broker.
        let width = response.halo.as_ref().map_or(0, |h| h.top.len());
        let halo = halo_from_proto(response.halo.as_ref(), width).map_err(self.decode_err())?;
        Ok((response.turn, halo))
    }

    async fn deliver_halo(&self, turn: u32, halo: HaloPair) -> Result<(), LinkError> {
        self.client()
            .send_halo_to_node(pb::HaloDelivery {
                turn,
                halo: Some(halo_to_proto(&halo)),
            })
            .await
            .map_err(self.rpc_err("SendHaloToNode"))?;
        Ok(())
    }

    async fn pause_and_resume(&self, command: Command) -> Result<PauseAck, LinkError> {
        let response = self
            .client()
            .pause_and_resume_node(pb::PauseRequest {
                command: command.to_proto(),
            })
            .await
            .map_err(self.rpc_err("PauseAndResumeNode"))?
            .into_inner();
        Ok(PauseAck {
            turn: response.turn,
            paused: response.paused,
        })
    }

    async fn shutdown(&self) -> Result<(), LinkError> {
        self.client()
            .shutdown(pb::Empty {})
            .await
            .map_err(self.rpc_err("Shutdown"))?;
        Ok(())
    }
}

// ── In-process ────────────────────────────────────────────────────────────────

/// Resolves addresses to worker nodes living in the same process.
#[derive(Default)]
pub struct LocalConnector {
    nodes: HashMap<String, Arc<WorkerNode>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, addr: impl Into<String>, node: Arc<WorkerNode>) -> Self {
        self.nodes.insert(addr.into(), node);
        self
    }
}

#[tonic::async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn NodeLink>, LinkError> {
        let node = self.nodes.get(addr).ok_or_else(|| LinkError::Connect {
            addr: addr.to_string(),
            reason: "no such in-process worker".to_string(),
        })?;
        Ok(Arc::new(LocalNodeLink {
            addr: addr.to_string(),
            node: Arc::clone(node),
        }))
    }
}

pub struct LocalNodeLink {
    addr: String,
    node: Arc<WorkerNode>,
}

impl LocalNodeLink {
    fn node_err(&self) -> impl FnOnce(crate::node::NodeError) -> LinkError + '_ {
        move |source| LinkError::Node {
            addr: self.addr.clone(),
            source,
        }
    }
}

#[tonic::async_trait]
impl NodeLink for LocalNodeLink {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn process_slice(&self, assignment: SliceAssignment) -> Result<WorldGrid, LinkError> {
        self.node
            .process_slice(assignment)
            .await
            .map_err(self.node_err())
    }

    async fn flipped_cells(&self, turn: u32) -> Result<(u32, Vec<CellPos>), LinkError> {
        let cells = self.node.flipped_cells(turn).await.map_err(self.node_err())?;
        Ok((turn, cells))
    }

    async fn turn_and_alive(&self, turn: u32) -> Result<(u32, u64), LinkError> {
        self.node.turn_and_alive(turn).await.map_err(self.node_err())
    }

    async fn halo_export(&self, turn: u32) -> Result<(u32, HaloPair), LinkError> {
        let halo = self.node.halo_export(turn).await.map_err(self.node_err())?;
        Ok((turn, halo))
    }

    async fn deliver_halo(&self, turn: u32, halo: HaloPair) -> Result<(), LinkError> {
        self.node.deliver_halo(turn, halo).map_err(self.node_err())
    }

    async fn pause_and_resume(&self, command: Command) -> Result<PauseAck, LinkError> {
        Ok(self.node.pause_and_resume(command))
    }

    async fn shutdown(&self) -> Result<(), LinkError> {
        self.node.shutdown();
        Ok(())
    }
}
