//! Concrete collaborators used by `portd`.

pub mod gauge;
pub mod haproxy;
pub mod snapshot;
pub mod spool;

pub use gauge::FileGauge;
pub use haproxy::HaproxyRuntime;
pub use snapshot::SnapshotFile;
pub use spool::JsonLinesSink;
