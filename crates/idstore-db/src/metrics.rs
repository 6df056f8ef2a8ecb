//! Transaction and connection counters via the `metrics` crate.
//!
//! Without an installed recorder every call here is a no-op; nothing in the
//! query layer reads these values back.

use metrics::{counter, gauge};

const TRANSACTIONS_COMMITTED: &str = "idstore_db_transactions_committed_total";
const TRANSACTIONS_ROLLED_BACK: &str = "idstore_db_transactions_rolled_back_total";
const CONNECTIONS_ACTIVE: &str = "idstore_db_connections_active";

pub(crate) fn record_commit() {
    counter!(TRANSACTIONS_COMMITTED).increment(1);
}

pub(crate) fn record_rollback() {
    counter!(TRANSACTIONS_ROLLED_BACK).increment(1);
}

pub(crate) fn connection_opened() {
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub(crate) fn connection_closed() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}
