//! Gap scanner
//!
//! Operator members watch the source chain independently and each keeps a
//! watermark: the first sequence it has not dealt with yet. The scanner
//! answers "which sequences in my window still need my attention", meaning
//! those nobody has provisioned yet and that this member has neither
//! submitted nor confirmed a pending provisioning transaction for. A member
//! that revokes its own submission still counts as having handled it.

use crate::{
    error::ValidationError,
    ledger::SequenceLedger,
    multisig::MultisigWallet,
    types::{Address, SeqNo, TxId},
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Watermark of a member that never reported one
pub const INITIAL_WATERMARK: SeqNo = 1;

/// Per-member watermarks and the sequence → transaction index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapScanner {
    watermarks: BTreeMap<Address, SeqNo>,
    seq_txs: BTreeMap<SeqNo, Vec<TxId>>,
}

impl GapScanner {
    /// Empty scanner
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a new Operator transaction provisioning `seq`
    pub fn record_submission(&mut self, seq: SeqNo, tx_id: TxId) {
        let txs = self.seq_txs.entry(seq).or_default();
        if !txs.contains(&tx_id) {
            txs.push(tx_id);
        }
    }

    /// Move the caller's watermark forward
    ///
    /// `operators` is the Operator wallet; only its current members have a
    /// watermark to move.
    pub fn update_watermark(
        &mut self,
        operators: &MultisigWallet,
        caller: Address,
        next_seq: SeqNo,
    ) -> Result<SeqNo> {
        operators.require_member(&caller)?;

        let current = self.unsubmitted_next_seq(&caller);
        if next_seq <= current {
            return Err(ValidationError::WatermarkNotAdvanced {
                current,
                requested: next_seq,
            }
            .into());
        }
        self.watermarks.insert(caller, next_seq);

        tracing::debug!(member = %caller, from = current, to = next_seq, "Watermark advanced");
        Ok(current)
    }

    /// Member's watermark
    pub fn unsubmitted_next_seq(&self, member: &Address) -> SeqNo {
        self.watermarks
            .get(member)
            .copied()
            .unwrap_or(INITIAL_WATERMARK)
    }

    /// Operator transactions ever submitted against `seq`
    pub fn seq2_tx_ids(&self, seq: SeqNo) -> &[TxId] {
        self.seq_txs.get(&seq).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sequences in `[watermark, watermark + window)` still needing `member`
    pub fn unconfirmed_provision_seqs(
        &self,
        ledger: &SequenceLedger,
        operators: &MultisigWallet,
        member: &Address,
        window: u64,
    ) -> Vec<SeqNo> {
        let start = self.unsubmitted_next_seq(member);
        let end = start.saturating_add(window);

        (start..end)
            .filter(|seq| !ledger.is_provisioned(*seq))
            .filter(|seq| !self.handled_by(operators, member, *seq))
            .collect()
    }

    fn handled_by(&self, operators: &MultisigWallet, member: &Address, seq: SeqNo) -> bool {
        self.seq2_tx_ids(seq).iter().any(|tx_id| {
            operators
                .transaction(*tx_id)
                .map_or(false, |tx| {
                    !tx.executed && (tx.submitter == *member || tx.confirmers.contains(member))
                })
        })
    }
}
