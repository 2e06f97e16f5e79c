use std::collections::BTreeSet;

use alloy_primitives::{Address, U256};

use crate::world::monitor::EventView;
use crate::world::transaction::Transaction;

/// Which notion of "already seen" a Coverage run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverageMode {
    Inst,
    InstTx,
    InstSg,
    InstInc,
    InstTxSeq { threshold: usize },
    Path,
    PathRelaxed,
}

impl CoverageMode {
    /// Parse a mode name as used on the command line (`inst-tx-seq`, ...).
    pub fn parse(name: &str, threshold: usize) -> Option<Self> {
        Some(match name.trim() {
            "inst" => CoverageMode::Inst,
            "inst-tx" => CoverageMode::InstTx,
            "inst-sg" => CoverageMode::InstSg,
            "inst-inc" => CoverageMode::InstInc,
            "inst-tx-seq" => CoverageMode::InstTxSeq { threshold },
            "path" => CoverageMode::Path,
            "path-relaxed" => CoverageMode::PathRelaxed,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            CoverageMode::Inst => "inst",
            CoverageMode::InstTx => "inst-tx",
            CoverageMode::InstSg => "inst-sg",
            CoverageMode::InstInc => "inst-inc",
            CoverageMode::InstTxSeq { .. } => "inst-tx-seq",
            CoverageMode::Path => "path",
            CoverageMode::PathRelaxed => "path-relaxed",
        }
    }

    pub fn is_path(self) -> bool {
        matches!(self, CoverageMode::Path | CoverageMode::PathRelaxed)
    }
}

/// Mode-specific part of a [`CoverageState`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Inst { pc: usize },
    InstTx { pc: usize, tx_num: usize },
    InstSg { pc: usize, storage: BTreeSet<U256> },
    InstInc { pc: usize, tx_num: usize, total_txs: usize },
    /// One entry per transaction; `None` marks a placeholder or a call
    /// without a full selector.
    InstTxSeq { pc: usize, selectors: Vec<Option<[u8; 4]>> },
    /// Taken branch targets since the input started, ending at the state's pc.
    Path { path: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoverageState {
    pub contract: Address,
    pub initialized: bool,
    pub key: StateKey,
}

/// The `get_state` capability, configured once per run.
#[derive(Debug, Clone)]
pub struct StateSelector {
    mode: CoverageMode,
    total_txs: usize,
    selectors: Vec<Option<[u8; 4]>>,
}

impl StateSelector {
    pub fn new(mode: CoverageMode) -> Self {
        Self {
            mode,
            total_txs: 0,
            selectors: Vec::new(),
        }
    }

    pub fn mode(&self) -> CoverageMode {
        self.mode
    }

    /// Capture the sequence-level facts the incremental and sequence modes key on.
    pub fn capture_sequence(&mut self, transactions: &[Transaction<'_>]) {
        self.total_txs = transactions.len();
        self.selectors = match self.mode {
            CoverageMode::InstTxSeq { threshold } if transactions.len() <= threshold => transactions
                .iter()
                .map(|tx| {
                    tx.recipient?;
                    let data = tx.data.concrete_bytes();
                    data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
                })
                .collect(),
            _ => Vec::new(),
        };
    }

    /// State reached at `pc` by the frame in `view`. `path` is the current
    /// branch path, only read by the path modes.
    pub fn get_state(&self, pc: usize, view: &EventView<'_, '_>, path: &[usize]) -> CoverageState {
        let key = match self.mode {
            CoverageMode::Inst => StateKey::Inst { pc },
            CoverageMode::InstTx => StateKey::InstTx {
                pc,
                tx_num: view.tx_num,
            },
            CoverageMode::InstSg => StateKey::InstSg {
                pc,
                storage: view.env.ledger.storage_fingerprint(&view.machine.storage_owner),
            },
            CoverageMode::InstInc => StateKey::InstInc {
                pc,
                tx_num: view.tx_num,
                total_txs: self.total_txs,
            },
            CoverageMode::InstTxSeq { .. } => StateKey::InstTxSeq {
                pc,
                selectors: self.selectors.clone(),
            },
            CoverageMode::Path | CoverageMode::PathRelaxed => {
                let mut full = path.to_vec();
                full.push(pc);
                StateKey::Path { path: full }
            }
        };
        CoverageState {
            contract: view.contract,
            initialized: view.initialized,
            key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::value::ByteBuf;

    #[test]
    fn test_parse_all_modes() {
        for name in ["inst", "inst-tx", "inst-sg", "inst-inc", "inst-tx-seq", "path", "path-relaxed"] {
            let mode = CoverageMode::parse(name, 3).unwrap();
            assert_eq!(mode.name(), name);
        }
        assert_eq!(CoverageMode::parse("inst-tx-seq", 7), Some(CoverageMode::InstTxSeq { threshold: 7 }));
        assert!(CoverageMode::parse("branch", 1).is_none());
        assert!(CoverageMode::PathRelaxed.is_path());
        assert!(!CoverageMode::InstSg.is_path());
    }

    #[test]
    fn test_sequence_selectors_respect_threshold() {
        let tx = |sel: u8| {
            Transaction::new(
                Address::ZERO,
                Some(Address::ZERO),
                ByteBuf::from_bytes(vec![sel, 0, 0, sel, 0xff]),
            )
        };
        let txs = vec![tx(1), tx(2), Transaction::new(Address::ZERO, None, ByteBuf::new())];

        let mut within = StateSelector::new(CoverageMode::InstTxSeq { threshold: 3 });
        within.capture_sequence(&txs);
        assert_eq!(within.selectors, vec![Some([1, 0, 0, 1]), Some([2, 0, 0, 2]), None]);
        assert_eq!(within.total_txs, 3);

        let mut beyond = StateSelector::new(CoverageMode::InstTxSeq { threshold: 2 });
        beyond.capture_sequence(&txs);
        assert!(beyond.selectors.is_empty());
    }

    #[test]
    fn test_sequence_keeps_position_of_calls_without_selector() {
        let call = Transaction::new(Address::ZERO, Some(Address::ZERO), ByteBuf::from_bytes(vec![0xab; 4]));
        let idle = Transaction::new(Address::ZERO, None, ByteBuf::new());
        let short = Transaction::new(Address::ZERO, Some(Address::ZERO), ByteBuf::from_bytes(vec![0xab; 3]));
        fn selectors(txs: &[Transaction<'_>]) -> Vec<Option<[u8; 4]>> {
            let mut sel = StateSelector::new(CoverageMode::InstTxSeq { threshold: 4 });
            sel.capture_sequence(txs);
            sel.selectors
        }

        let first = selectors(&[call.clone(), idle.clone()]);
        let second = selectors(&[idle, call.clone()]);
        assert_eq!(first, vec![Some([0xab; 4]), None]);
        assert_ne!(first, second);
        assert_eq!(selectors(&[short, call]), vec![None, Some([0xab; 4])]);
    }
}
