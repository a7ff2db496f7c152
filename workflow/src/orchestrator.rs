//! Operation bookkeeping.
//!
//! Every run of an operation is tagged with a generation.  Whenever
//! the inputs change, a new generation is allocated, and only the
//! result of the latest generation is ever published.  Results of
//! earlier generations are dropped when they arrive.

use log::debug;

use crate::{ErrorKind, Result};
use crate::mode::Mode;
use crate::provider::Verification;

/// The result of a successful operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    /// An armored ciphertext.
    Encrypted(String),
    /// The recovered plaintext.
    Decrypted(String),
    /// A cleartext signed message.
    Signed(String),
    /// The outcome of a verification.
    Verified(Verification),
}

impl Output {
    /// Returns the text to show to the user.
    pub fn text(&self) -> &str {
        match self {
            Output::Encrypted(s) | Output::Decrypted(s) | Output::Signed(s) =>
                s,
            Output::Verified(v) => &v.content,
        }
    }
}

/// Where an operation is at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// Waiting for the debounce delay to pass, or running.
    Pending,
    /// Waiting for the passphrase.
    AwaitingUnlock,
    /// Done.
    Succeeded(Output),
    /// Failed.
    Failed {
        /// What went wrong.
        kind: ErrorKind,
        /// Why.
        message: String,
    },
}

/// The current operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    /// Identifies the run.
    pub generation: u64,
    /// What is being done.
    pub mode: Mode,
    /// Where it is at.
    pub status: Status,
}

impl Operation {
    /// Returns whether the operation has not produced a result yet.
    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }

    /// Returns the output, if the operation succeeded.
    pub fn output(&self) -> Option<&Output> {
        match &self.status {
            Status::Succeeded(o) => Some(o),
            _ => None,
        }
    }
}

/// Allocates generations and decides which results get published.
#[derive(Debug, Default)]
pub struct Orchestrator {
    latest: u64,
    published: u64,
    current: Option<Operation>,
}

impl Orchestrator {
    /// Returns a fresh orchestrator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current operation, if any.
    pub fn current(&self) -> Option<&Operation> {
        self.current.as_ref()
    }

    /// Returns the latest allocated generation.
    pub fn latest(&self) -> u64 {
        self.latest
    }

    /// Returns the generation of the last published result.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Starts a run of `mode`, superseding any run in flight.
    ///
    /// Returns the run's generation.
    pub fn begin(&mut self, mode: Mode) -> u64 {
        self.install(mode, Status::Pending)
    }

    /// Records that `mode` cannot run until the key is unlocked.
    ///
    /// This supersedes any run in flight.
    pub fn await_unlock(&mut self, mode: Mode) -> u64 {
        self.install(mode, Status::AwaitingUnlock)
    }

    /// Drops the current operation, superseding any run in flight.
    pub fn reset(&mut self) {
        self.latest += 1;
        self.current = None;
    }

    fn install(&mut self, mode: Mode, status: Status) -> u64 {
        self.latest += 1;
        self.current = Some(Operation {
            generation: self.latest,
            mode,
            status,
        });
        self.latest
    }

    /// Applies the result of run `generation`.
    ///
    /// Returns whether the result was published.
    pub fn complete(&mut self, generation: u64, result: Result<Output>)
                    -> bool
    {
        let op = match self.current.as_mut() {
            Some(op) if op.generation == generation
                && generation == self.latest
                && generation > self.published => op,
            _ => {
                debug!("Dropping result of generation {}, latest is {}",
                       generation, self.latest);
                return false;
            },
        };

        self.published = generation;
        op.status = match result {
            Ok(output) => Status::Succeeded(output),
            Err(err) => Status::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        };
        debug!("Published {} result of generation {}", op.mode, generation);
        true
    }
}
