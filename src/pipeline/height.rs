use crate::rpc::types::{AbciEvent, BlockResponse, BlockResults, TxResult, ValidatorSet};

/// Everything fetched for one height before it enters the ordered dispatch.
/// `validators` is `None` in minimal mode.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightData {
    pub block: BlockResponse,
    pub results: BlockResults,
    pub validators: Option<ValidatorSet>,
}

impl HeightData {
    pub fn new(block: BlockResponse, results: BlockResults, validators: Option<ValidatorSet>) -> Self {
        Self {
            block,
            results,
            validators,
        }
    }

    pub fn height(&self) -> u64 {
        self.block.height()
    }

    pub fn time(&self) -> &str {
        self.block.time()
    }

    pub fn txs(&self) -> &[String] {
        self.block.txs()
    }

    pub fn tx_results(&self) -> &[TxResult] {
        &self.results.txs_results
    }

    pub fn begin_block_events(&self) -> Vec<AbciEvent> {
        self.results.begin_events()
    }

    pub fn end_block_events(&self) -> Vec<AbciEvent> {
        self.results.end_events()
    }
}
