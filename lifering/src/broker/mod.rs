/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Broker: partitions the world, drives the worker ring and serves the
//! client.
//!
//! One run of [`Broker::complete_turn`]:
//!
//! ```text
//! partition ─► dial ─► ProcessSlice ×N (generation-1 halo included)
//!                         │
//!   ┌─────────────────────┘
//!   ▼
//!   collect g (flipped, alive, halo) from every node ─► merge ─► commit mirror
//!   ─► telemetry fan-in ─► [gate] ─► ring exchange ─► push halos for g+1 ─► …
//!   ▼
//! join slices in partition order ─► reassemble ─► cross-check mirror
//! ```
//!
//! Any link failure, collection timeout or protocol violation after setup
//! records the run's first failure, cancels the run token and is returned to
//! the `CompleteTurn` caller.  `ResetState` and `Shutdown` cancel the same
//! token.

pub mod error;
pub mod link;
pub mod service;
pub mod telemetry;

pub use error::{BrokerError, LinkError};
pub use link::{Connector, GrpcConnector, LocalConnector, NodeLink};
pub use telemetry::{TelemetryFanIn, TelemetryRecord};

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::try_join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::control::{Command, RunGate};
use crate::halo::{initial_halos, ring_exchange, HaloPair};
use crate::node::{PauseAck, SliceAssignment};
use crate::partition::{partition_rows, Partition};
use crate::world::{CellPos, WorldGrid};

// ── Run bookkeeping ───────────────────────────────────────────────────────────

struct Committed {
    turn: u32,
    world: Arc<WorldGrid>,
    alive: u64,
}

/// Links of the run in progress plus its cancellation token.
struct ActiveRun {
    links: Vec<Arc<dyn NodeLink>>,
    cancel: CancellationToken,
}

/// First failure of a run.  Recording any failure cancels the run.
struct RunFailure {
    cancel: CancellationToken,
    first: Mutex<Option<BrokerError>>,
}

impl RunFailure {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            first: Mutex::new(None),
        }
    }

    fn record(&self, err: BrokerError) {
        {
            let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
            if first.is_none() {
                if !matches!(err, BrokerError::Cancelled) {
                    error!(error = %err, "Run failed, cancelling");
                }
                *first = Some(err);
            }
        }
        self.cancel.cancel();
    }

    fn take(&self) -> Option<BrokerError> {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// One node's artifacts for one generation.
struct Artifacts {
    flipped: Vec<CellPos>,
    alive: u64,
    export: HaloPair,
}

struct Run {
    links: Vec<Arc<dyn NodeLink>>,
    partitions: Vec<Partition>,
    width: usize,
    failure: Arc<RunFailure>,
}

// ── Broker ────────────────────────────────────────────────────────────────────

pub struct Broker {
    config: BrokerConfig,
    connector: Arc<dyn Connector>,
    committed: RwLock<Committed>,
    telemetry: TelemetryFanIn,
    gate: RunGate,
    active: Mutex<Option<ActiveRun>>,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig, connector: Arc<dyn Connector>) -> Self {
        let telemetry = TelemetryFanIn::new(config.telemetry_depth, config.telemetry_backpressure);
        Self {
            config,
            connector,
            committed: RwLock::new(Committed {
                turn: 0,
                world: Arc::new(WorldGrid::new(0, 0)),
                alive: 0,
            }),
            telemetry,
            gate: RunGate::new(),
            active: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Broker dialling real worker processes over gRPC.
    pub fn with_grpc(config: BrokerConfig) -> Self {
        let connector = GrpcConnector::new(config.connect_timeout(), config.max_message_bytes);
        Self::new(config, Arc::new(connector))
    }

    // ── CompleteTurn ──────────────────────────────────────────────────────────

    /// Run `turns` generations of `world` across `workers` (or the
    /// configured pool when empty).  Returns the final generation and grid.
    ///
    /// # Errors
    /// * Setup: [`BrokerError::InvalidWorld`], [`BrokerError::Partition`],
    ///   [`BrokerError::RunInProgress`], [`BrokerError::Connect`].
    /// * Mid-run: the first [`BrokerError::Link`],
    ///   [`BrokerError::CollectTimeout`] or [`BrokerError::Protocol`], or
    ///   [`BrokerError::Cancelled`] after `ResetState` / `Shutdown`.
    pub async fn complete_turn(
        &self,
        turns: u32,
        world: WorldGrid,
        workers: Vec<String>,
    ) -> Result<(u32, WorldGrid), BrokerError> {
        world.ensure_not_empty()?;
        let workers = if workers.is_empty() {
            self.config.workers.clone()
        } else {
            workers
        };
        let partitions = partition_rows(world.height(), workers.len())?;

        let cancel = self.shutdown.child_token();
        let _slot = self.begin_run(cancel.clone())?;
        self.gate.reset();
        self.telemetry.drain();
        self.commit(0, Arc::new(world.clone()), world.alive_count());

        info!(
            height = world.height(),
            width = world.width(),
            workers = workers.len(),
            turns,
            "Run started"
        );

        if turns == 0 {
            info!("Zero turns requested, returning initial world");
            return Ok((0, world));
        }

        let links = self.dial(&workers, &cancel).await?;
        self.attach_links(&links);

        let run = Run {
            links,
            partitions,
            width: world.width(),
            failure: Arc::new(RunFailure::new(cancel)),
        };

        let mut slices = self.start_slices(&run, &world, turns);

        if let Err(err) = self.run_generations(&run, turns).await {
            run.failure.record(err);
        }

        let mut bands: Vec<Option<WorldGrid>> = vec![None; run.links.len()];
        while let Some(joined) = slices.join_next().await {
            match joined {
                Ok((index, band)) => bands[index] = band,
                Err(e) => run
                    .failure
                    .record(BrokerError::Protocol(format!("slice task aborted: {e}"))),
            }
        }

        if let Some(err) = run.failure.take() {
            warn!(error = %err, "Run aborted");
            return Err(err);
        }

        let final_world = self.reassemble(bands)?;
        info!(turns, alive = final_world.alive_count(), "Run complete");
        Ok((turns, final_world))
    }

    fn begin_run(&self, cancel: CancellationToken) -> Result<RunSlot<'_>, BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::ShuttingDown);
        }
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(BrokerError::RunInProgress);
        }
        *active = Some(ActiveRun {
            links: Vec::new(),
            cancel,
        });
        Ok(RunSlot { broker: self })
    }

    fn attach_links(&self, links: &[Arc<dyn NodeLink>]) {
        if let Some(run) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            run.links = links.to_vec();
        }
    }

    async fn dial(
        &self,
        workers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<dyn NodeLink>>, BrokerError> {
        let dials = workers.iter().map(|addr| async move {
            self.connector.connect(addr).await.map_err(|e| {
                error!(worker = %addr, error = %e, "Failed to connect to worker");
                BrokerError::Connect(e)
            })
        });
        tokio::select! {
            links = try_join_all(dials) => links,
            _ = cancel.cancelled() => Err(BrokerError::Cancelled),
        }
    }

    /// Spawn one long-lived `ProcessSlice` call per partition.
    ///
    /// Each task yields `(partition index, final band)`; the band is `None`
    /// when the call failed or the run was cancelled.
    fn start_slices(
        &self,
        run: &Run,
        world: &WorldGrid,
        turns: u32,
    ) -> JoinSet<(usize, Option<WorldGrid>)> {
        let halos = initial_halos(world, &run.partitions);
        let mut slices = JoinSet::new();

        for ((partition, link), initial_halo) in run.partitions.iter().zip(&run.links).zip(halos) {
            let assignment = SliceAssignment {
                partition: *partition,
                turns,
                band: world.band(partition.rows()),
                initial_halo,
            };
            let link = Arc::clone(link);
            let failure = Arc::clone(&run.failure);
            let index = partition.index;

            debug!(partition = index, worker = %link.addr(), rows = ?partition.rows(), "Assigning slice");
            slices.spawn(async move {
                let result = tokio::select! {
                    r = link.process_slice(assignment) => r,
                    _ = failure.cancel.cancelled() => return (index, None),
                };
                match result {
                    Ok(band) => (index, Some(band)),
                    Err(source) => {
                        failure.record(BrokerError::Link {
                            partition: index,
                            source,
                        });
                        (index, None)
                    }
                }
            });
        }
        slices
    }

    async fn run_generations(&self, run: &Run, turns: u32) -> Result<(), BrokerError> {
        for turn in 1..=turns {
            let artifacts = self.collect(run, turn).await?;

            let mut record = TelemetryRecord {
                turn,
                alive: 0,
                flipped: Vec::new(),
            };
            let mut exports = Vec::with_capacity(artifacts.len());
            for a in artifacts {
                record.alive += a.alive;
                record.flipped.extend(a.flipped);
                exports.push(a.export);
            }

            self.apply_generation(&record)?;
            debug!(turn, alive = record.alive, flipped = record.flipped.len(), "Generation merged");

            self.telemetry.deposit(record, &run.failure.cancel).await?;

            if turn < turns {
                self.pass_gate(turn, &run.failure.cancel).await?;
                self.push_halos(run, turn + 1, ring_exchange(&exports)).await?;
            }
        }
        Ok(())
    }

    /// Pull generation `turn` from every node concurrently.
    async fn collect(&self, run: &Run, turn: u32) -> Result<Vec<Artifacts>, BrokerError> {
        let timeout = self.config.collect_timeout();
        let pulls = run.links.iter().zip(&run.partitions).map(|(link, partition)| {
            collect_one(&**link, &self.gate, *partition, run.width, turn, timeout)
        });

        tokio::select! {
            artifacts = try_join_all(pulls) => artifacts,
            _ = run.failure.cancel.cancelled() => Err(BrokerError::Cancelled),
        }
    }

    async fn push_halos(
        &self,
        run: &Run,
        turn: u32,
        imports: Vec<HaloPair>,
    ) -> Result<(), BrokerError> {
        let timeout = self.config.collect_timeout();
        let pushes = run
            .links
            .iter()
            .zip(imports)
            .enumerate()
            .map(|(partition, (link, halo))| async move {
                tokio::time::timeout(timeout, link.deliver_halo(turn, halo))
                    .await
                    .map_err(|_| BrokerError::CollectTimeout {
                        partition,
                        turn,
                        timeout,
                    })?
                    .map_err(|source| BrokerError::Link { partition, source })
            });

        tokio::select! {
            pushed = try_join_all(pushes) => pushed.map(|_| ()),
            _ = run.failure.cancel.cancelled() => Err(BrokerError::Cancelled),
        }
    }

    async fn pass_gate(&self, turn: u32, cancel: &CancellationToken) -> Result<(), BrokerError> {
        if self.gate.is_paused() {
            info!(turn, "Run paused at generation boundary");
        }
        tokio::select! {
            _ = self.gate.pass(turn + 1) => Ok(()),
            _ = cancel.cancelled() => Err(BrokerError::Cancelled),
        }
    }

    /// Roll the committed mirror forward by one generation's merged flips.
    fn apply_generation(&self, record: &TelemetryRecord) -> Result<(), BrokerError> {
        let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        let mut world = committed.world.as_ref().clone();
        world.apply_flips(&record.flipped)?;

        let counted = world.alive_count();
        if counted != record.alive {
            return Err(BrokerError::Protocol(format!(
                "generation {}: nodes report {} alive cells, flipped cells give {}",
                record.turn, record.alive, counted
            )));
        }

        committed.turn = record.turn;
        committed.world = Arc::new(world);
        committed.alive = record.alive;
        Ok(())
    }

    fn commit(&self, turn: u32, world: Arc<WorldGrid>, alive: u64) {
        let mut committed = self.committed.write().unwrap_or_else(PoisonError::into_inner);
        committed.turn = turn;
        committed.world = world;
        committed.alive = alive;
    }

    fn reassemble(&self, bands: Vec<Option<WorldGrid>>) -> Result<WorldGrid, BrokerError> {
        let bands = bands
            .into_iter()
            .enumerate()
            .map(|(i, b)| b.ok_or_else(|| BrokerError::Protocol(format!("partition {i} returned no band"))))
            .collect::<Result<Vec<_>, _>>()?;
        let world = WorldGrid::from_bands(bands)?;

        let committed = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        if *committed.world != world {
            return Err(BrokerError::Protocol(format!(
                "final bands disagree with the committed world at generation {}",
                committed.turn
            )));
        }
        Ok(world)
    }

    // ── Client-facing queries and control ─────────────────────────────────────

    /// `(turn, alive)` of the last committed generation.
    pub fn alive_cells(&self) -> (u32, u64) {
        let committed = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        (committed.turn, committed.alive)
    }

    /// The last committed generation's full grid.
    pub fn world(&self) -> (u32, Arc<WorldGrid>) {
        let committed = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        (committed.turn, Arc::clone(&committed.world))
    }

    /// Block until the next generation's telemetry record is available.
    pub async fn next_telemetry(&self) -> Result<TelemetryRecord, BrokerError> {
        tokio::select! {
            record = self.telemetry.next() => record,
            _ = self.shutdown.cancelled() => Err(BrokerError::ShuttingDown),
        }
    }

    /// Apply `command` to the broker's own gate, then relay it to every node
    /// of the active run.
    ///
    /// A pause ack carries the gate's frontier: the last generation that can
    /// still commit before the run holds.  A resume ack carries the committed
    /// generation.
    ///
    /// # Errors
    /// [`BrokerError::NoActiveRun`] when idle; [`BrokerError::Link`] if a
    /// node could not be reached.
    pub async fn pause_and_resume(&self, command: Command) -> Result<PauseAck, BrokerError> {
        let links = {
            let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            match active.as_ref() {
                Some(run) => run.links.clone(),
                None => return Err(BrokerError::NoActiveRun),
            }
        };

        self.gate.apply(command);
        let turn = match command {
            Command::Pause => self.gate.frontier(),
            Command::Resume => self.alive_cells().0,
        };

        for (partition, link) in links.iter().enumerate() {
            link.pause_and_resume(command)
                .await
                .map_err(|source| BrokerError::Link { partition, source })?;
        }

        info!(?command, turn, nodes = links.len(), "Pause/resume applied");
        Ok(PauseAck {
            turn,
            paused: self.gate.is_paused(),
        })
    }

    /// Stop the active run, if any.  The committed mirror is kept.
    pub fn reset_state(&self) {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(run) => {
                info!("Reset requested, cancelling active run");
                run.cancel.cancel();
            }
            None => debug!("Reset requested with no active run"),
        }
        drop(active);
        self.gate.reset();
    }

    /// Cancel the active run, relay `Shutdown` to its nodes and stop serving.
    pub async fn shutdown(&self) {
        let links = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|run| run.links.clone())
            .unwrap_or_default();

        warn!(nodes = links.len(), "Broker shutting down");
        self.shutdown.cancel();

        for link in &links {
            if let Err(e) = link.shutdown().await {
                warn!(worker = %link.addr(), error = %e, "Failed to relay shutdown");
            }
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Pulls the three artifacts of one node for generation `turn` and checks
/// them against the partition and generation the broker expects.
///
/// Time spent while the broker is paused does not count against `timeout`.
async fn collect_one(
    link: &dyn NodeLink,
    gate: &RunGate,
    partition: Partition,
    width: usize,
    turn: u32,
    timeout: Duration,
) -> Result<Artifacts, BrokerError> {
    let index = partition.index;
    let pull = async {
        tokio::try_join!(
            link.flipped_cells(turn),
            link.turn_and_alive(turn),
            link.halo_export(turn),
        )
        .map_err(|source| BrokerError::Link {
            partition: index,
            source,
        })
    };
    tokio::pin!(pull);
    let ((flipped_turn, flipped), (alive_turn, alive), (halo_turn, export)) = loop {
        match tokio::time::timeout(timeout, &mut pull).await {
            Ok(pulled) => break pulled?,
            // A paused node is not a silent node.
            Err(_) if gate.is_paused() => continue,
            Err(_) => {
                return Err(BrokerError::CollectTimeout {
                    partition: index,
                    turn,
                    timeout,
                })
            }
        }
    };

    if flipped_turn != turn || alive_turn != turn || halo_turn != turn {
        return Err(BrokerError::Protocol(format!(
            "partition {index} reported generations {flipped_turn}/{alive_turn}/{halo_turn}, expected {turn}"
        )));
    }
    if export.top.len() != width || export.bottom.len() != width {
        return Err(BrokerError::Protocol(format!(
            "partition {index} exported halo of width {}, expected {width}",
            export.top.len()
        )));
    }
    if let Some(stray) = flipped.iter().find(|c| !partition.rows().contains(&c.row) || c.col >= width) {
        return Err(BrokerError::Protocol(format!(
            "partition {index} reported flipped cell ({}, {}) outside its rows {:?}",
            stray.row,
            stray.col,
            partition.rows()
        )));
    }
    if alive > (partition.len() * width) as u64 {
        return Err(BrokerError::Protocol(format!(
            "partition {index} reported {alive} alive cells in a {}x{width} band",
            partition.len()
        )));
    }

    debug!(partition = index, turn, alive, flipped = flipped.len(), "Collected generation");
    Ok(Artifacts {
        flipped,
        alive,
        export,
    })
}

/// Clears the active run when `complete_turn` returns, however it returns.
struct RunSlot<'a> {
    broker: &'a Broker,
}

impl Drop for RunSlot<'_> {
    fn drop(&mut self) {
        *self
            .broker
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::WorkerNode;
    use crate::world::rules::step_world;

    const GLIDER_5X5: &str = ".#...\n..#..\n###..\n.....\n.....\n";

    fn local_broker(n: usize, config: BrokerConfig) -> (Broker, Vec<String>, Vec<Arc<WorkerNode>>) {
        let mut connector = LocalConnector::new();
        let mut addrs = Vec::new();
        let mut nodes = Vec::new();
        for i in 0..n {
            let addr = format!("node-{i}");
            let node = Arc::new(WorkerNode::new());
            connector = connector.with_node(addr.clone(), Arc::clone(&node));
            addrs.push(addr);
            nodes.push(node);
        }
        (Broker::new(config, Arc::new(connector)), addrs, nodes)
    }

    /// Run while a client drains every telemetry record.
    async fn run_draining(
        broker: &Broker,
        turns: u32,
        world: WorldGrid,
        workers: Vec<String>,
    ) -> (Result<(u32, WorldGrid), BrokerError>, Vec<TelemetryRecord>) {
        let consume = async {
            let mut records = Vec::new();
            while records.len() < turns as usize {
                match broker.next_telemetry().await {
                    Ok(r) => records.push(r),
                    Err(_) => break,
                }
            }
            records
        };
        tokio::join!(broker.complete_turn(turns, world, workers), consume)
    }

    fn reference(world: &WorldGrid, turns: u32) -> Vec<WorldGrid> {
        let mut out = vec![world.clone()];
        for _ in 0..turns {
            let next = step_world(out.last().unwrap()).unwrap();
            out.push(next);
        }
        out
    }

    #[tokio::test]
    async fn glider_on_single_worker_shifts_diagonally() {
        let (broker, addrs, _nodes) = local_broker(1, BrokerConfig::default());
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();

        let (result, records) = run_draining(&broker, 4, world, addrs).await;
        let (turn, final_world) = result.unwrap();

        let expected: WorldGrid = ".....\n..#..\n...#.\n.###.\n.....\n".parse().unwrap();
        assert_eq!(turn, 4);
        assert_eq!(final_world, expected);
        assert_eq!(records.iter().map(|r| r.turn).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(records.iter().all(|r| r.alive == 5));
    }

    #[tokio::test]
    async fn glider_on_four_by_four_torus_matches_reference() {
        let (broker, addrs, _nodes) = local_broker(1, BrokerConfig::default());
        let world: WorldGrid = ".#..\n..#.\n###.\n....\n".parse().unwrap();
        let mut expected = world.clone();
        for _ in 0..4 {
            expected = step_world(&expected).unwrap();
        }

        let (result, records) = run_draining(&broker, 4, world, addrs).await;
        assert_eq!(result.unwrap(), (4, expected));
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn all_dead_world_stays_dead() {
        let (broker, addrs, _nodes) = local_broker(2, BrokerConfig::default());
        let world = WorldGrid::new(8, 8);

        let (result, records) = run_draining(&broker, 5, world.clone(), addrs).await;
        assert_eq!(result.unwrap(), (5, world));
        assert_eq!(records.len(), 5);
        for r in records {
            assert_eq!(r.alive, 0);
            assert!(r.flipped.is_empty());
        }
    }

    #[tokio::test]
    async fn three_partitions_match_the_reference_every_generation() {
        let (broker, addrs, _nodes) = local_broker(3, BrokerConfig::default());
        // R-pentomino on an 8-row world: the last band absorbs the remainder.
        let world: WorldGrid = "........\n...##...\n..##....\n...#....\n........\n........\n........\n........\n"
            .parse()
            .unwrap();
        let steps = reference(&world, 12);

        let (result, records) = run_draining(&broker, 12, world, addrs).await;
        let (_, final_world) = result.unwrap();
        assert_eq!(final_world, steps[12]);

        for r in &records {
            let g = r.turn as usize;
            assert_eq!(r.alive, steps[g].alive_count(), "alive at turn {g}");

            let mut replay = steps[g - 1].clone();
            replay.apply_flips(&r.flipped).unwrap();
            assert_eq!(replay, steps[g], "flipped cells at turn {g}");
        }
    }

    #[tokio::test]
    async fn committed_world_tracks_the_run() {
        let (broker, addrs, _nodes) = local_broker(2, BrokerConfig::default());
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();
        let (result, _) = run_draining(&broker, 3, world.clone(), addrs).await;
        let (_, final_world) = result.unwrap();

        assert_eq!(broker.alive_cells(), (3, 5));
        let (turn, committed) = broker.world();
        assert_eq!(turn, 3);
        assert_eq!(*committed, final_world);
        assert_eq!(final_world, reference(&world, 3)[3]);
    }

    #[tokio::test]
    async fn pause_freezes_progress_and_resume_finishes_identically() {
        let (broker, addrs, _nodes) = local_broker(2, BrokerConfig::default());
        let world: WorldGrid = "........\n.#......\n..#.....\n###.....\n........\n........\n........\n........\n"
            .parse()
            .unwrap();
        let expected = reference(&world, 10)[10].clone();

        let client = async {
            let mut last = 0;
            while last < 3 {
                last = broker.next_telemetry().await.unwrap().turn;
            }
            let ack = broker.pause_and_resume(Command::Pause).await.unwrap();
            assert!(ack.paused);
            assert!(ack.turn >= 3);

            // Whatever was still in flight drains, but nothing past the ack.
            while let Ok(record) =
                tokio::time::timeout(Duration::from_millis(100), broker.next_telemetry()).await
            {
                let record = record.unwrap();
                assert!(record.turn <= ack.turn, "generation {} ran past the pause", record.turn);
                last = record.turn;
            }

            let (t1, w1) = broker.world();
            tokio::time::sleep(Duration::from_millis(150)).await;
            let (t2, w2) = broker.world();
            assert_eq!(t1, t2, "generation advanced while paused");
            assert_eq!(w1, w2);
            assert!(t1 <= ack.turn);
            assert!(t1 < 10);

            let ack = broker.pause_and_resume(Command::Resume).await.unwrap();
            assert!(!ack.paused);
            while last < 10 {
                last = broker.next_telemetry().await.unwrap().turn;
            }
        };

        let (result, ()) = tokio::join!(broker.complete_turn(10, world, addrs), client);
        assert_eq!(result.unwrap(), (10, expected));
    }

    #[tokio::test]
    async fn zero_turns_returns_initial_world_without_dialling() {
        let (broker, _, _) = local_broker(0, BrokerConfig::default());
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();
        let result = broker
            .complete_turn(0, world.clone(), vec!["unreachable".into()])
            .await
            .unwrap();
        assert_eq!(result, (0, world));
    }

    #[tokio::test]
    async fn configured_pool_is_used_when_request_names_no_workers() {
        let config = BrokerConfig {
            workers: vec!["node-0".into(), "node-1".into()],
            ..BrokerConfig::default()
        };
        let (broker, _, _) = local_broker(2, config);
        let world = WorldGrid::new(4, 4);
        let (result, _) = run_draining(&broker, 2, world.clone(), Vec::new()).await;
        assert_eq!(result.unwrap(), (2, world));
    }

    #[tokio::test]
    async fn setup_errors_are_reported_and_release_the_run_slot() {
        let (broker, mut addrs, _nodes) = local_broker(2, BrokerConfig::default());
        let world = WorldGrid::new(4, 4);

        let err = broker
            .complete_turn(1, world.clone(), vec!["node-0".into(), "missing".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Connect(LinkError::Connect { .. })));

        let err = broker
            .complete_turn(1, WorldGrid::new(1, 4), addrs.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Partition(_)));

        let err = broker.complete_turn(1, world.clone(), Vec::new()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Partition(crate::partition::PartitionError::NoWorkers)));

        let err = broker.complete_turn(1, WorldGrid::new(0, 0), addrs.clone()).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidWorld(_)));

        addrs.truncate(1);
        let (result, _) = run_draining(&broker, 1, world.clone(), addrs).await;
        assert_eq!(result.unwrap(), (1, world));
    }

    #[tokio::test]
    async fn pause_without_a_run_is_rejected() {
        let (broker, _, _) = local_broker(1, BrokerConfig::default());
        assert!(matches!(
            broker.pause_and_resume(Command::Pause).await,
            Err(BrokerError::NoActiveRun)
        ));
    }

    #[tokio::test]
    async fn reset_cancels_a_run_and_second_run_is_rejected_meanwhile() {
        let (broker, addrs, _nodes) = local_broker(2, BrokerConfig::default());
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();

        // Nobody drains telemetry, so the run parks on the fan-in.
        let control = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let second = broker.complete_turn(1, world.clone(), addrs.clone()).await;
            assert!(matches!(second, Err(BrokerError::RunInProgress)));
            broker.reset_state();
        };
        let (result, ()) = tokio::join!(broker.complete_turn(1_000, world.clone(), addrs.clone()), control);
        assert!(matches!(result, Err(BrokerError::Cancelled)));

        // The broker accepts a fresh run afterwards; stale telemetry is gone.
        let (result, records) = run_draining(&broker, 4, world, addrs).await;
        assert_eq!(result.unwrap().0, 4);
        assert_eq!(records.first().map(|r| r.turn), Some(1));
    }

    #[tokio::test]
    async fn shutdown_cancels_the_run_and_stops_the_nodes() {
        let (broker, addrs, nodes) = local_broker(2, BrokerConfig::default());
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();

        let control = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            broker.shutdown().await;
        };
        let (result, ()) = tokio::join!(broker.complete_turn(1_000, world, addrs), control);
        assert!(matches!(result, Err(BrokerError::Cancelled)));
        assert!(broker.shutdown_token().is_cancelled());
        assert!(nodes.iter().all(|n| n.shutdown_token().is_cancelled()));
    }

    // ── Failure injection ─────────────────────────────────────────────────────

    #[derive(Clone, Copy)]
    enum Fault {
        Error,
        Hang,
        SlowPause(Duration),
    }

    /// Delegates to a local node but misbehaves when asked for `at`.
    struct FaultyLink {
        inner: Arc<dyn NodeLink>,
        at: u32,
        fault: Fault,
    }

    impl FaultyLink {
        async fn trip(&self, turn: u32) -> Result<(), LinkError> {
            if turn != self.at {
                return Ok(());
            }
            match self.fault {
                Fault::Error => Err(LinkError::Rpc {
                    addr: self.inner.addr().to_string(),
                    call: "GetFlippedCells",
                    status: tonic::Status::unavailable("connection reset"),
                }),
                Fault::Hang => std::future::pending().await,
                Fault::SlowPause(_) => Ok(()),
            }
        }
    }

    #[tonic::async_trait]
    impl NodeLink for FaultyLink {
        fn addr(&self) -> &str {
            self.inner.addr()
        }
        async fn process_slice(&self, a: SliceAssignment) -> Result<WorldGrid, LinkError> {
            self.inner.process_slice(a).await
        }
        async fn flipped_cells(&self, turn: u32) -> Result<(u32, Vec<CellPos>), LinkError> {
            self.trip(turn).await?;
            self.inner.flipped_cells(turn).await
        }
        async fn turn_and_alive(&self, turn: u32) -> Result<(u32, u64), LinkError> {
            self.inner.turn_and_alive(turn).await
        }
        async fn halo_export(&self, turn: u32) -> Result<(u32, HaloPair), LinkError> {
            self.inner.halo_export(turn).await
        }
        async fn deliver_halo(&self, turn: u32, halo: HaloPair) -> Result<(), LinkError> {
            self.inner.deliver_halo(turn, halo).await
        }
        async fn pause_and_resume(&self, command: Command) -> Result<PauseAck, LinkError> {
            if let Fault::SlowPause(delay) = self.fault {
                tokio::time::sleep(delay).await;
            }
            self.inner.pause_and_resume(command).await
        }
        async fn shutdown(&self) -> Result<(), LinkError> {
            self.inner.shutdown().await
        }
    }

    /// Wraps `faulty_addr` in a [`FaultyLink`]; other addresses are local.
    struct FaultyConnector {
        local: LocalConnector,
        faulty_addr: String,
        at: u32,
        fault: Fault,
    }

    #[tonic::async_trait]
    impl Connector for FaultyConnector {
        async fn connect(&self, addr: &str) -> Result<Arc<dyn NodeLink>, LinkError> {
            let inner = self.local.connect(addr).await?;
            if addr != self.faulty_addr {
                return Ok(inner);
            }
            Ok(Arc::new(FaultyLink {
                inner,
                at: self.at,
                fault: self.fault,
            }))
        }
    }

    fn faulty_broker(config: BrokerConfig, at: u32, fault: Fault) -> (Broker, Vec<String>) {
        let local = LocalConnector::new()
            .with_node("node-0", Arc::new(WorkerNode::new()))
            .with_node("node-1", Arc::new(WorkerNode::new()));
        let connector = FaultyConnector {
            local,
            faulty_addr: "node-1".into(),
            at,
            fault,
        };
        (
            Broker::new(config, Arc::new(connector)),
            vec!["node-0".into(), "node-1".into()],
        )
    }

    #[tokio::test]
    async fn mid_run_link_failure_aborts_the_run() {
        let config = BrokerConfig {
            telemetry_backpressure: false,
            ..BrokerConfig::default()
        };
        let (broker, addrs) = faulty_broker(config, 3, Fault::Error);
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();

        let err = broker.complete_turn(10, world, addrs).await.unwrap_err();
        match err {
            BrokerError::Link { partition, source } => {
                assert_eq!(partition, 1);
                assert!(matches!(source, LinkError::Rpc { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Generations 1 and 2 were committed before the failure.
        assert_eq!(broker.alive_cells().0, 2);
    }

    #[tokio::test]
    async fn silent_node_hits_the_collection_deadline() {
        let config = BrokerConfig {
            collect_timeout_ms: 100,
            telemetry_backpressure: false,
            ..BrokerConfig::default()
        };
        let (broker, addrs) = faulty_broker(config, 2, Fault::Hang);
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();

        let err = broker.complete_turn(5, world, addrs).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::CollectTimeout {
                partition: 1,
                turn: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn slow_pause_relay_does_not_let_the_run_outpace_the_ack() {
        let config = BrokerConfig {
            telemetry_backpressure: false,
            ..BrokerConfig::default()
        };
        let (broker, addrs) =
            faulty_broker(config, u32::MAX, Fault::SlowPause(Duration::from_millis(100)));
        let world: WorldGrid = GLIDER_5X5.parse().unwrap();

        let control = async {
            while broker.alive_cells().0 < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let ack = broker.pause_and_resume(Command::Pause).await.unwrap();
            assert!(ack.paused);

            tokio::time::sleep(Duration::from_millis(100)).await;
            let (held, _) = broker.alive_cells();
            assert!(held <= ack.turn, "committed {held} after a pause acked at {}", ack.turn);
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(broker.alive_cells().0, held);

            broker.reset_state();
        };

        let (result, ()) = tokio::join!(broker.complete_turn(100_000, world, addrs), control);
        assert!(matches!(result, Err(BrokerError::Cancelled)));
    }
}
