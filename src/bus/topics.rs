//! Reserved event-type names.

pub const BLOCK: &str = "block";
pub const BEGIN_BLOCK: &str = "begin_block";
pub const END_BLOCK: &str = "end_block";
pub const TX_EVENTS: &str = "tx_events";
pub const TX_MEMO: &str = "tx_memo";

/// Catch-all for publishes nobody listens to.
pub const UNHANDLED: &str = "_unhandled";

pub const PERIODIC_PREFIX: &str = "periodic/";
/// Ascending; a height divisible by a longer interval fires every shorter
/// one that divides it too.
pub const PERIODIC_INTERVALS: [u64; 3] = [50, 100, 1000];

pub const GENESIS_ARRAY_PREFIX: &str = "genesis/array/";
pub const GENESIS_VALUE_PREFIX: &str = "genesis/value/";
pub const GENTX_PREFIX: &str = "gentx/";

pub fn periodic(interval: u64) -> String {
    format!("{PERIODIC_PREFIX}{interval}")
}

pub fn genesis_array(path: &str) -> String {
    format!("{GENESIS_ARRAY_PREFIX}{path}")
}

pub fn genesis_value(path: &str) -> String {
    format!("{GENESIS_VALUE_PREFIX}{path}")
}

pub fn gentx(type_url: &str) -> String {
    format!("{GENTX_PREFIX}{type_url}")
}
