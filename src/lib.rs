//! faultmedic -- fault detection, recovery dispatch and predictive fault
//! analytics for compute-cluster schedulers.
//!
//! Faults are recorded in a [`fault::registry::FaultRegistry`] and handed to
//! the [`recovery::RecoveryEngine`], which runs an ordered list of strategies
//! per fault type until one succeeds. Independently, the
//! [`analysis::runner::PredictiveFaultDetector`] turns metric series into
//! fault predictions and learns from how they turn out.
//! [`manager::FaultToleranceManager`] ties both halves together.

pub mod analysis;
pub mod config;
pub mod driver;
pub mod fault;
pub mod manager;
pub mod recovery;

pub use config::Config;
pub use manager::FaultToleranceManager;
