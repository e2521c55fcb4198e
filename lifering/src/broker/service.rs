/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! gRPC `BrokerService` implementation backed by a [`Broker`].

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info;

use crate::broker::{Broker, BrokerError};
use crate::control::Command;
use crate::proto::lifering_v1 as pb;
use crate::proto::lifering_v1::broker_service_server::BrokerService;
use crate::wire::{cells_to_proto, grid_from_proto, grid_to_proto};

pub struct BrokerServiceImpl {
    broker: Arc<Broker>,
}

impl BrokerServiceImpl {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

#[tonic::async_trait]
impl BrokerService for BrokerServiceImpl {
    async fn complete_turn(
        &self,
        request: Request<pb::RunRequest>,
    ) -> Result<Response<pb::RunResponse>, Status> {
        let req = request.into_inner();
        let grid = req
            .world
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("RunRequest carries no world"))?;
        let world = grid_from_proto(grid).map_err(BrokerError::from)?;

        info!(
            turns = req.turns,
            height = world.height(),
            width = world.width(),
            workers = req.workers.len(),
            "CompleteTurn received"
        );

        let (turn, world) = self
            .broker
            .complete_turn(req.turns, world, req.workers)
            .await?;
        Ok(Response::new(pb::RunResponse {
            turn,
            world: Some(grid_to_proto(&world)),
        }))
    }

    async fn alive_cell_getter(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::AliveCellsResponse>, Status> {
        let (turn, alive) = self.broker.alive_cells();
        Ok(Response::new(pb::AliveCellsResponse { turn, alive }))
    }

    async fn get_world(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::WorldResponse>, Status> {
        let (turn, world) = self.broker.world();
        Ok(Response::new(pb::WorldResponse {
            turn,
            world: Some(grid_to_proto(&world)),
        }))
    }

    async fn get_world_per_turn(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::TelemetryRecord>, Status> {
        let record = self.broker.next_telemetry().await?;
        Ok(Response::new(pb::TelemetryRecord {
            turn: record.turn,
            alive: record.alive,
            flipped: cells_to_proto(&record.flipped),
        }))
    }

    async fn pause_and_resume(
        &self,
        request: Request<pb::PauseRequest>,
    ) -> Result<Response<pb::PauseResponse>, Status> {
        let raw = request.into_inner().command;
        let command = Command::from_proto(raw).ok_or(BrokerError::InvalidCommand(raw))?;
        let ack = self.broker.pause_and_resume(command).await?;
        Ok(Response::new(pb::PauseResponse {
            turn: ack.turn,
            paused: ack.paused,
        }))
    }

    async fn reset_state(&self, _request: Request<pb::Empty>) -> Result<Response<pb::Empty>, Status> {
        self.broker.reset_state();
        Ok(Response::new(pb::Empty {}))
    }

    async fn shutdown(&self, _request: Request<pb::Empty>) -> Result<Response<pb::Empty>, Status> {
        self.broker.shutdown().await;
        Ok(Response::new(pb::Empty {}))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalConnector;
    use crate::config::BrokerConfig;
    use crate::node::WorkerNode;
    use crate::world::WorldGrid;

    fn service_with_one_node() -> BrokerServiceImpl {
        let connector = LocalConnector::new().with_node("node-0", Arc::new(WorkerNode::new()));
        let broker = Broker::new(BrokerConfig::default(), Arc::new(connector));
        BrokerServiceImpl::new(Arc::new(broker))
    }

    #[tokio::test]
    async fn missing_world_is_invalid_argument() {
        let svc = service_with_one_node();
        let status = svc
            .complete_turn(Request::new(pb::RunRequest {
                turns: 1,
                world: None,
                workers: vec!["node-0".into()],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn malformed_cell_byte_is_invalid_argument() {
        let svc = service_with_one_node();
        let status = svc
            .complete_turn(Request::new(pb::RunRequest {
                turns: 1,
                world: Some(pb::Grid {
                    height: 1,
                    width: 2,
                    rows: vec![vec![0xFF, 0x7F]],
                }),
                workers: vec!["node-0".into()],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn zero_turn_run_is_visible_through_queries() {
        let svc = service_with_one_node();
        let world: WorldGrid = "#.\n.#\n".parse().unwrap();
        let response = svc
            .complete_turn(Request::new(pb::RunRequest {
                turns: 0,
                world: Some(grid_to_proto(&world)),
                workers: vec!["node-0".into()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.turn, 0);
        assert_eq!(grid_from_proto(&response.world.unwrap()).unwrap(), world);

        let alive = svc
            .alive_cell_getter(Request::new(pb::Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!((alive.turn, alive.alive), (0, 2));

        let saved = svc.get_world(Request::new(pb::Empty {})).await.unwrap().into_inner();
        assert_eq!(grid_from_proto(&saved.world.unwrap()).unwrap(), world);
    }

    #[tokio::test]
    async fn pause_while_idle_is_failed_precondition() {
        let svc = service_with_one_node();
        let status = svc
            .pause_and_resume(Request::new(pb::PauseRequest {
                command: Command::Pause.to_proto(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status = svc
            .pause_and_resume(Request::new(pb::PauseRequest { command: 0 }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
