//! Per-stage generation counters.
//!
//! Every input change bumps the counter of its stage and of every stage after it. Async
//! work captures a [`Ticket`] when it starts and only publishes its result if the ticket
//! is still current when it finishes.

use serde::Serialize;
use std::fmt;

/// Pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Resolve,
    Encode,
    Transaction,
    UserOperation,
    Sign,
    Submit,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Resolve,
        Stage::Encode,
        Stage::Transaction,
        Stage::UserOperation,
        Stage::Sign,
        Stage::Submit,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// This stage and every stage that depends on it.
    pub fn and_downstream(self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().skip(self.index())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Encode => "encode",
            Stage::Transaction => "transaction",
            Stage::UserOperation => "user operation",
            Stage::Sign => "sign",
            Stage::Submit => "submit",
        };
        f.write_str(name)
    }
}

/// Proof that a piece of work was started at a given generation of its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub stage: Stage,
    generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generations {
    counters: [u64; Stage::ALL.len()],
}

impl Generations {
    pub fn current(&self, stage: Stage) -> u64 {
        self.counters[stage.index()]
    }

    /// Record an input change at `stage` and return the ticket for work on the new input.
    pub fn advance(&mut self, stage: Stage) -> Ticket {
        for s in stage.and_downstream() {
            self.counters[s.index()] += 1;
        }
        Ticket {
            stage,
            generation: self.current(stage),
        }
    }

    /// Whether no input change has touched `ticket.stage` since the ticket was issued.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.current(ticket.stage) == ticket.generation
    }
}
