//! Scheduled payment processing.
//!
//! A tick collects every unexecuted payment that is due and applies each one through
//! [`Ledger::execute_scheduled`], which credits the player and flips `executed` in a
//! single unit of work. Payments are isolated from each other: one failure is logged
//! and the rest of the tick carries on.

use std::sync::Arc;

use log::{error, info, warn};

use crate::clock::Clock;
use crate::errors::{Rejection, StoreError};
use crate::ledger::Ledger;
use crate::types::{PlayerRecord, ScheduledPayment};

/// What a tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Applied payments with the credited player as it stands afterwards.
    pub applied: Vec<(ScheduledPayment, PlayerRecord)>,
    /// Payments retired because their target no longer exists.
    pub orphaned: Vec<u64>,
    /// Payments left for the next tick after a storage failure.
    pub failed: Vec<u64>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.orphaned.is_empty() && self.failed.is_empty()
    }
}

pub struct PaymentScheduler {
    ledger: Arc<Ledger>,
    clock: Arc<dyn Clock>,
}

impl PaymentScheduler {
    pub fn new(ledger: Arc<Ledger>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Process every payment due at the current clock reading.
    pub fn run_tick(&self) -> Result<TickReport, StoreError> {
        let now = self.clock.now();
        let due = self.ledger.store().due_payments(now)?;
        let mut report = TickReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        info!("processing {} scheduled payments", due.len());

        for payment in due {
            match self.ledger.execute_scheduled(payment.id) {
                Ok(Ok((receipt, executed))) => match receipt.credited {
                    Some(player) => {
                        info!(
                            "scheduled payment #{} applied: {} to {}",
                            executed.id,
                            executed.amount,
                            player.user_id
                        );
                        report.applied.push((executed, player));
                    }
                    None => {
                        error!("scheduled payment #{} applied without a credited player", payment.id);
                        report.failed.push(payment.id);
                    }
                },
                Ok(Err(Rejection::PlayerNotFound(user_id))) => {
                    // Retire it so it is not retried forever.
                    warn!(
                        "player {} not found for scheduled payment #{}, marking executed",
                        user_id, payment.id
                    );
                    match self.ledger.store().mark_payment_executed(payment.id, now) {
                        Ok(_) => report.orphaned.push(payment.id),
                        Err(e) => {
                            error!("failed to retire scheduled payment #{}: {}", payment.id, e);
                            report.failed.push(payment.id);
                        }
                    }
                }
                Ok(Err(Rejection::PaymentAlreadyExecuted(_))) => {
                    // Applied by an overlapping tick.
                }
                Ok(Err(other)) => {
                    warn!("scheduled payment #{} rejected: {}", payment.id, other);
                    report.failed.push(payment.id);
                }
                Err(e) => {
                    error!("scheduled payment #{} failed: {}", payment.id, e);
                    report.failed.push(payment.id);
                }
            }
        }
        Ok(report)
    }
}
