//! CPE-initiated RPCs waiting for a session slot.

use std::collections::VecDeque;

use tokio::sync::watch;

use crate::download::TransferOutcome;
use crate::soap::{render_transfer_complete, Envelope};

/// Result report for an earlier `Download`.
#[derive(Debug)]
pub struct TransferCompleteReport {
    pub command_key: String,
    pub start_time: String,
    outcome: watch::Receiver<TransferOutcome>,
}

impl TransferCompleteReport {
    pub fn new(
        command_key: String,
        start_time: String,
        outcome: watch::Receiver<TransferOutcome>,
    ) -> Self {
        Self { command_key, start_time, outcome }
    }

    /// The fetch result as of now.
    pub fn outcome(&self) -> TransferOutcome {
        self.outcome.borrow().clone()
    }

    fn render(&self, envelope: &mut Envelope) {
        let outcome = self.outcome();
        render_transfer_complete(
            envelope,
            &self.command_key,
            &self.start_time,
            &outcome.fault_code,
            &outcome.fault_string,
        );
    }
}

#[derive(Debug)]
pub enum PendingOperation {
    TransferComplete(TransferCompleteReport),
}

impl PendingOperation {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::TransferComplete(_) => "TransferComplete",
        }
    }

    pub fn render(&self, envelope: &mut Envelope) {
        match self {
            Self::TransferComplete(report) => report.render(envelope),
        }
    }
}

/// FIFO of pending operations. An item leaves the queue once the ACS has
/// answered it.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<PendingOperation>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, operation: PendingOperation) {
        self.items.push_back(operation);
    }

    pub fn dequeue(&mut self) -> Option<PendingOperation> {
        self.items.pop_front()
    }

    /// Puts back an operation whose exchange failed, ahead of everything else.
    pub fn requeue_front(&mut self, operation: PendingOperation) {
        self.items.push_front(operation);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
