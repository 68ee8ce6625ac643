// 8.0 netting.rs: cross-venue netting. pending per-user obligations are drained
// into one multilateral net per (vault, user), committed to with a keccak merkle
// root, and submitted as a single atomic ledger batch per vault. the batch id
// goes through the refId dedup set, so a replayed window is a no-op failure.

use crate::ledger::{Ledger, LedgerError, NetLeaf};
use crate::merkle::{keccak256, leaf_hash, MerkleTree};
use crate::types::{Bps, Money, RefId, SignedMoney, Timestamp, UserKey, VaultId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A pending cross-venue credit (+) or debit (-) awaiting a netting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub user: UserKey,
    pub vault: VaultId,
    pub amount: SignedMoney,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NettingError {
    #[error("nothing to net")]
    NothingPending,
    #[error("ledger rejected batch: {0}")]
    Ledger(#[from] LedgerError),
}

/// Outcome of one submitted vault batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub vault: VaultId,
    pub batch_id: RefId,
    pub root: RefId,
    pub leaves: usize,
    pub gross_volume: Money,
    pub netted_volume: Money,
    pub fee_collected: Money,
}

/// Outcome of a netting window across all vaults.
#[derive(Debug, Clone, Default)]
pub struct NettingReport {
    pub batches: Vec<BatchReport>,
    /// Vaults whose batch failed; their obligations were re-queued.
    pub failed: Vec<(VaultId, LedgerError)>,
    pub gross_volume: Money,
    pub netted_volume: Money,
    pub savings: Money,
}

#[derive(Debug, Default)]
pub struct NettingEngine {
    pending: Vec<Obligation>,
    nonce: u64,
}

impl NettingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, obligation: Obligation) {
        self.pending.push(obligation);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drain everything pending and submit one atomic batch per vault.
    /// A vault whose batch the ledger rejects gets its original obligations
    /// back in the queue for the next window.
    pub fn run_window(
        &mut self,
        ledger: &mut Ledger,
        fee_bps: Bps,
        now: Timestamp,
    ) -> Result<NettingReport, NettingError> {
        if self.pending.is_empty() {
            return Err(NettingError::NothingPending);
        }
        let drained = std::mem::take(&mut self.pending);

        // group by vault, preserving original obligations for requeue on failure
        let mut by_vault: BTreeMap<VaultId, Vec<Obligation>> = BTreeMap::new();
        for obligation in drained {
            by_vault.entry(obligation.vault).or_default().push(obligation);
        }

        let mut report = NettingReport::default();
        for (vault, obligations) in by_vault {
            let gross: Money = obligations
                .iter()
                .map(|o| o.amount.abs_money())
                .sum();
            report.gross_volume = report.gross_volume.checked_add(gross).unwrap_or(report.gross_volume);

            // multilateral net per user, zero sums discarded; BTreeMap keeps
            // the canonical user-ascending leaf order
            let mut nets: BTreeMap<UserKey, i128> = BTreeMap::new();
            for obligation in &obligations {
                *nets.entry(obligation.user).or_insert(0) += obligation.amount.units() as i128;
            }
            let mut leaves = Vec::with_capacity(nets.len());
            let mut representable = true;
            for (user, net) in nets {
                if net == 0 {
                    continue;
                }
                match i64::try_from(net) {
                    Ok(units) => leaves.push(NetLeaf {
                        user,
                        amount: SignedMoney::from_units(units),
                    }),
                    Err(_) => {
                        representable = false;
                        break;
                    }
                }
            }
            if !representable {
                warn!(vault = vault.0, "net amount overflow; requeueing vault");
                self.pending.extend(obligations);
                report
                    .failed
                    .push((vault, LedgerError::Math(crate::types::MathError::Overflow)));
                continue;
            }
            if leaves.is_empty() {
                debug!(vault = vault.0, "window netted to zero; nothing to submit");
                continue;
            }

            let hashes: Vec<[u8; 32]> = leaves
                .iter()
                .map(|leaf| leaf_hash(&leaf.user, leaf.amount.abs_money()))
                .collect();
            let tree = MerkleTree::build(hashes).expect("leaves checked non-empty");
            let root = tree.root_ref();
            let batch_id = RefId(keccak256(&[&root.0, &self.nonce.to_be_bytes()]));
            self.nonce += 1;

            match ledger.apply_net_batch(vault, batch_id, root, &leaves, fee_bps, gross, now) {
                Ok(outcome) => {
                    report.netted_volume = report
                        .netted_volume
                        .checked_add(outcome.netted_volume)
                        .unwrap_or(report.netted_volume);
                    report.batches.push(BatchReport {
                        vault,
                        batch_id,
                        root,
                        leaves: outcome.leaves_applied,
                        gross_volume: gross,
                        netted_volume: outcome.netted_volume,
                        fee_collected: outcome.fee_collected,
                    });
                }
                Err(err) => {
                    warn!(vault = vault.0, %err, "netting batch rejected; requeueing");
                    self.pending.extend(obligations);
                    report.failed.push((vault, err));
                }
            }
        }

        report.savings = report.gross_volume.saturating_sub(report.netted_volume);
        Ok(report)
    }
}
