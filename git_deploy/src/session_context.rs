//! Single bundle of the process-wide mutable caches (§9): the ref
//! inventory, the config store, and the timing ledger. Threaded explicitly
//! through the orchestrator rather than held in `static`/`OnceCell`
//! globals.

use crate::config::ConfigStore;
use crate::inventory::RefInventory;
use crate::timing::TimingLedger;

#[derive(Default)]
pub struct SessionContext {
    pub inventory: RefInventory,
    pub config: ConfigStore,
    pub timing: TimingLedger,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }
}
