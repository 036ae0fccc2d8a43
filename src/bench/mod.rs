//! Benchmark test runners.
//!
//! Pair enumeration decides who talks to whom; the latency, p2p and udp
//! runners execute the remote commands for each pair over the transport and
//! leave timestamped raw result files plus a batch summary in the data
//! directory. Runners never abort the batch on a single failed pair.

pub mod latency;
pub mod p2p;
pub mod pairing;
pub mod udp;

use chrono::Local;

/// Filename timestamp shared by all result artifacts. Later stages find the
/// newest artifact by lexicographic filename order, which this format sorts
/// correctly.
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}
