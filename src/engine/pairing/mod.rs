//! Binary pairing bonuses.
//!
//! A new placement climbs the placement tree. At every ancestor it either
//! completes a pair with the oldest waiting half on the opposite side or
//! waits on its own side. Claim-or-queue is a single store call per level
//! (or per ascent, in whole-ascent mode).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::{CompensationConfig, PairingCommit};
use crate::model::{AccountId, GenealogyNode, Side};
use crate::storage::{ClaimResult, GenealogyStore, LedgerStore, PairingClaim, Result, StorageError};

use super::ancestry::{AncestorWalker, AscentHalt, PlacementTree};

/// What happened at one ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelOutcome {
    pub ancestor: AccountId,
    pub level: u32,
    /// Side the new node arrived on under `ancestor`.
    pub side: Side,
    pub result: ClaimResult,
}

/// Result of handling one placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementReport {
    pub node: AccountId,
    pub levels: Vec<LevelOutcome>,
    pub halt: AscentHalt,
}

impl PlacementReport {
    /// Number of pairs this placement completed.
    pub fn matches(&self) -> usize {
        self.levels
            .iter()
            .filter(|l| matches!(l.result, ClaimResult::Matched { .. }))
            .count()
    }

    /// Bonus credited by this placement.
    pub fn total_paid(&self) -> Decimal {
        self.levels
            .iter()
            .filter_map(|l| match &l.result {
                ClaimResult::Matched { pairing, .. } => Some(pairing.amount),
                _ => None,
            })
            .sum()
    }
}

pub struct PairingMatcher {
    genealogy: Arc<dyn GenealogyStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl PairingMatcher {
    pub fn new(genealogy: Arc<dyn GenealogyStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { genealogy, ledger }
    }

    /// Evaluate every placement ancestor of `node` up to the pairing level cap.
    ///
    /// In per-level mode each level commits on its own, so an error at level
    /// N leaves levels below N committed. Re-running the handler for the same
    /// node is safe either way: levels already settled report
    /// [`ClaimResult::AlreadySettled`] and write nothing.
    pub async fn handle_new_placement(
        &self,
        config: &CompensationConfig,
        node: &GenealogyNode,
        commit: PairingCommit,
        now: DateTime<Utc>,
    ) -> Result<PlacementReport> {
        let tree = PlacementTree::new(self.genealogy.clone());
        let mut walker = AncestorWalker::from_node(&tree, node, config.pairing_max_level);

        let mut claims = Vec::new();
        let mut levels = Vec::new();
        let mut stopped = None;

        while let Some(step) = walker.next_ancestor().await? {
            let Some(side) = step.child_side else {
                warn!(
                    node = %node.account_id,
                    ancestor = %step.ancestor,
                    child = %step.child,
                    level = step.level,
                    "Placement node has no side, halting ascent"
                );
                stopped = Some(AscentHalt::MissingSide(step.child));
                break;
            };

            let amount = config.pairing_amount(step.level);
            if amount.is_zero() {
                debug!(node = %node.account_id, level = step.level, "Pairing amount is zero, halting ascent");
                stopped = Some(AscentHalt::ZeroAmount { level: step.level });
                break;
            }

            let claim = PairingClaim {
                ancestor_account_id: step.ancestor,
                level: step.level,
                side,
                node_account_id: node.account_id,
                amount,
                at: now,
            };

            match commit {
                PairingCommit::PerLevel => {
                    let results = self.ledger.settle_pairing(std::slice::from_ref(&claim)).await?;
                    let result = single_result(results)?;
                    levels.push(outcome(&claim, result));
                }
                PairingCommit::WholeAscent => claims.push(claim),
            }
        }

        if !claims.is_empty() {
            let results = self.ledger.settle_pairing(&claims).await?;
            if results.len() != claims.len() {
                return Err(StorageError::corrupt(
                    "pairing_queue",
                    format!("{} claims settled as {} results", claims.len(), results.len()),
                ));
            }
            levels.extend(
                claims
                    .iter()
                    .zip(results)
                    .map(|(claim, result)| outcome(claim, result)),
            );
        }

        let halt = stopped.or(walker.halt()).unwrap_or(AscentHalt::Root);
        let report = PlacementReport {
            node: node.account_id,
            levels,
            halt,
        };

        debug!(
            node = %node.account_id,
            levels = report.levels.len(),
            matches = report.matches(),
            halt = %report.halt,
            "Placement handled"
        );
        Ok(report)
    }
}

fn single_result(results: Vec<ClaimResult>) -> Result<ClaimResult> {
    results
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::corrupt("pairing_queue", "claim settled without a result"))
}

fn outcome(claim: &PairingClaim, result: ClaimResult) -> LevelOutcome {
    match &result {
        ClaimResult::Matched { pairing, .. } => info!(
            ancestor = %pairing.ancestor_account_id,
            level = pairing.level,
            left = %pairing.left_account_id,
            right = %pairing.right_account_id,
            amount = %pairing.amount,
            "Pairing matched"
        ),
        ClaimResult::Queued(entry) => debug!(
            ancestor = %entry.ancestor_account_id,
            level = entry.level,
            side = %entry.side,
            node = %entry.node_account_id,
            "Half queued"
        ),
        ClaimResult::AlreadySettled => debug!(
            ancestor = %claim.ancestor_account_id,
            level = claim.level,
            node = %claim.node_account_id,
            "Level already settled"
        ),
    }

    LevelOutcome {
        ancestor: claim.ancestor_account_id,
        level: claim.level,
        side: claim.side,
        result,
    }
}

#[cfg(test)]
mod tests;
