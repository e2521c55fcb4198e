/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! gRPC `NodeService` implementation backed by a [`WorkerNode`].
//!
//! Requests are decoded and validated here; all run semantics live in
//! [`WorkerNode`].

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::control::Command;
use crate::node::{SliceAssignment, WorkerNode};
use crate::partition::Partition;
use crate::proto::lifering_v1 as pb;
use crate::proto::lifering_v1::node_service_server::NodeService;
use crate::wire::{cells_to_proto, halo_from_proto, halo_to_proto};
use crate::world::WorldGrid;

pub struct NodeServiceImpl {
    node: Arc<WorkerNode>,
}

impl NodeServiceImpl {
    pub fn new(node: Arc<WorkerNode>) -> Self {
        Self { node }
    }
}

fn grid_status(err: crate::world::GridError) -> Status {
    Status::invalid_argument(err.to_string())
}

/// Encode an assignment as sent by the broker.
pub fn assignment_to_proto(assignment: &SliceAssignment) -> pb::SliceRequest {
    pb::SliceRequest {
        partition_index: assignment.partition.index as u32,
        start_row: assignment.partition.start as u32,
        end_row: assignment.partition.end as u32,
        width: assignment.band.width() as u32,
        turns: assignment.turns,
        band: assignment.band.to_wire_rows(),
        initial_halo: Some(halo_to_proto(&assignment.initial_halo)),
    }
}

/// Decode a `SliceRequest` into an assignment.
pub fn assignment_from_proto(req: &pb::SliceRequest) -> Result<SliceAssignment, Status> {
    if req.end_row < req.start_row {
        return Err(Status::invalid_argument(format!(
            "end_row {} precedes start_row {}",
            req.end_row, req.start_row
        )));
    }
    let width = req.width as usize;
    let band = WorldGrid::from_wire_rows(&req.band, width).map_err(grid_status)?;
    let initial_halo = halo_from_proto(req.initial_halo.as_ref(), width).map_err(grid_status)?;
    Ok(SliceAssignment {
        partition: Partition {
            index: req.partition_index as usize,
            start: req.start_row as usize,
            end: req.end_row as usize,
        },
        turns: req.turns,
        band,
        initial_halo,
    })
}

#[tonic::async_trait]
impl NodeService for NodeServiceImpl {
    async fn process_slice(
        &self,
        request: Request<pb::SliceRequest>,
    ) -> Result<Response<pb::SliceResponse>, Status> {
        let assignment = assignment_from_proto(request.get_ref())?;
        let turns = assignment.turns;
        let band = self.node.process_slice(assignment).await.map_err(|e| {
            warn!(error = %e, "ProcessSlice failed");
            Status::from(e)
        })?;
        Ok(Response::new(pb::SliceResponse {
            turn: turns,
            band: band.to_wire_rows(),
        }))
    }

    async fn get_flipped_cells(
        &self,
        request: Request<pb::ArtifactRequest>,
    ) -> Result<Response<pb::FlippedCellsResponse>, Status> {
        let turn = request.into_inner().turn;
        let cells = self.node.flipped_cells(turn).await?;
        Ok(Response::new(pb::FlippedCellsResponse {
            turn,
            cells: cells_to_proto(&cells),
        }))
    }

    async fn get_turn_and_alive_cell(
        &self,
        request: Request<pb::ArtifactRequest>,
    ) -> Result<Response<pb::TurnAliveResponse>, Status> {
        let (turn, alive) = self
            .node
            .turn_and_alive(request.into_inner().turn)
            .await?;
        Ok(Response::new(pb::TurnAliveResponse { turn, alive }))
    }

    async fn send_halo_to_broker(
        &self,
        request: Request<pb::ArtifactRequest>,
    ) -> Result<Response<pb::HaloExport>, Status> {
        let turn = request.into_inner().turn;
        let halo = self.node.halo_export(turn).await?;
        Ok(Response::new(pb::HaloExport {
            turn,
            halo: Some(halo_to_proto(&halo)),
        }))
    }

    async fn send_halo_to_node(
        &self,
        request: Request<pb::HaloDelivery>,
    ) -> Result<Response<pb::Empty>, Status> {
        let req = request.into_inner();
        let width = req.halo.as_ref().map_or(0, |h| h.top.len());
        let halo = halo_from_proto(req.halo.as_ref(), width).map_err(grid_status)?;
        self.node.deliver_halo(req.turn, halo)?;
        debug!(turn = req.turn, "Halo delivered");
        Ok(Response::new(pb::Empty {}))
    }

    async fn pause_and_resume_node(
        &self,
        request: Request<pb::PauseRequest>,
    ) -> Result<Response<pb::PauseResponse>, Status> {
        let raw = request.into_inner().command;
        let command = Command::from_proto(raw)
            .ok_or_else(|| Status::invalid_argument(format!("unknown command value {raw}")))?;
        let ack = self.node.pause_and_resume(command);
        Ok(Response::new(pb::PauseResponse {
            turn: ack.turn,
            paused: ack.paused,
        }))
    }

    async fn get_node(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::NodeSnapshot>, Status> {
        let snapshot = self.node.snapshot();
        Ok(Response::new(pb::NodeSnapshot {
            turn: snapshot.turn,
            start_row: snapshot.partition.map_or(0, |p| p.start as u32),
            band: snapshot.band.to_wire_rows(),
        }))
    }

    async fn shutdown(&self, _request: Request<pb::Empty>) -> Result<Response<pb::Empty>, Status> {
        self.node.shutdown();
        Ok(Response::new(pb::Empty {}))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Cell;

    fn slice_request(rows: &[&[u8]], width: u32) -> pb::SliceRequest {
        pb::SliceRequest {
            partition_index: 0,
            start_row: 0,
            end_row: rows.len() as u32,
            width,
            turns: 1,
            band: rows.iter().map(|r| r.to_vec()).collect(),
            initial_halo: Some(pb::HaloPair {
                top: vec![0; width as usize],
                bottom: vec![0; width as usize],
            }),
        }
    }

    #[test]
    fn assignment_decodes_band_and_halo() {
        let req = slice_request(&[&[0xFF, 0x00], &[0x00, 0x00]], 2);
        let a = assignment_from_proto(&req).unwrap();
        assert_eq!(a.band.get(0, 0), Cell::Alive);
        assert_eq!(a.partition.len(), 2);
        assert_eq!(a.initial_halo.width(), 2);
    }

    #[test]
    fn bad_cell_byte_is_invalid_argument() {
        let req = slice_request(&[&[0x01, 0x00]], 2);
        let status = assignment_from_proto(&req).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn missing_initial_halo_is_invalid_argument() {
        let mut req = slice_request(&[&[0x00, 0x00]], 2);
        req.initial_halo = None;
        let status = assignment_from_proto(&req).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn unspecified_pause_command_is_rejected() {
        let svc = NodeServiceImpl::new(Arc::new(WorkerNode::new()));
        let status = svc
            .pause_and_resume_node(Request::new(pb::PauseRequest { command: 0 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn get_node_before_assignment_is_empty() {
        let svc = NodeServiceImpl::new(Arc::new(WorkerNode::new()));
        let snap = svc.get_node(Request::new(pb::Empty {})).await.unwrap().into_inner();
        assert_eq!(snap.turn, 0);
        assert!(snap.band.is_empty());
    }
}
