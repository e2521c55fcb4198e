/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pause/resume commands and the run state they toggle.
//!
//! Both the broker and every worker node hold a [`RunGate`].  A loop calls
//! [`RunGate::pass`] at exactly one point per generation boundary; while the
//! gate is [`RunState::Paused`] that call parks until a resume arrives.

use tokio::sync::watch;

use crate::proto::lifering_v1 as pb;

/// Control command relayed from the client through the broker to every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
}

impl Command {
    /// Parse the proto enum value.  `COMMAND_UNSPECIFIED` and unknown values
    /// yield `None`.
    pub fn from_proto(v: i32) -> Option<Self> {
        match pb::Command::try_from(v).ok()? {
            pb::Command::Pause => Some(Command::Pause),
            pb::Command::Resume => Some(Command::Resume),
            pb::Command::Unspecified => None,
        }
    }

    pub fn to_proto(self) -> i32 {
        match self {
            Command::Pause => pb::Command::Pause as i32,
            Command::Resume => pb::Command::Resume as i32,
        }
    }

    /// State a gate is in after this command.
    pub fn target_state(self) -> RunState {
        match self {
            Command::Pause => RunState::Paused,
            Command::Resume => RunState::Running,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GateState {
    run: RunState,
    /// Highest generation the gate has let through.  Generation 1 never
    /// waits at a gate, so it is admitted by [`RunGate::reset`].
    admitted: u32,
}

/// Explicit RUNNING/PAUSED state evaluated once per generation.
///
/// Admission and pausing are serialised through the same watch value, so once
/// [`apply`](RunGate::apply) has paused the gate no generation beyond
/// [`frontier`](RunGate::frontier) can start until a resume arrives.
#[derive(Debug)]
pub struct RunGate {
    state: watch::Sender<GateState>,
}

impl RunGate {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(GateState {
                run: RunState::Running,
                admitted: 1,
            }),
        }
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().run
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    /// Highest generation admitted so far.
    pub fn frontier(&self) -> u32 {
        self.state.borrow().admitted
    }

    /// Apply `command`; returns the state before the change.
    pub fn apply(&self, command: Command) -> RunState {
        let mut previous = RunState::Running;
        self.state.send_modify(|s| {
            previous = s.run;
            s.run = command.target_state();
        });
        previous
    }

    /// Force the gate open with only generation 1 admitted (a new run).
    pub fn reset(&self) {
        self.state.send_replace(GateState {
            run: RunState::Running,
            admitted: 1,
        });
    }

    /// Admit generation `next`: return immediately when running, otherwise
    /// park until resumed.
    pub async fn pass(&self, next: u32) {
        let mut rx = self.state.subscribe();
        loop {
            let admitted = self.state.send_if_modified(|s| {
                if s.run == RunState::Running {
                    s.admitted = s.admitted.max(next);
                    true
                } else {
                    false
                }
            });
            if admitted {
                return;
            }
            // The sender lives in `self`, so the channel cannot close while we wait.
            let _ = rx.wait_for(|s| s.run == RunState::Running).await;
        }
    }
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
