use std::sync::Arc;

use crate::ledger::FjallOperationStore;
use crate::queue::FjallBroker;

/// The only owners of the broker and ledger partitions
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<FjallBroker>,
    pub store: Arc<FjallOperationStore>,
}

impl AppState {
    pub fn new(broker: FjallBroker, store: FjallOperationStore) -> Self {
        Self {
            broker: Arc::new(broker),
            store: Arc::new(store),
        }
    }
}
