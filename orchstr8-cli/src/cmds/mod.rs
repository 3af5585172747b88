pub mod binaries;
pub mod fixture;
pub mod publish;
pub mod stack;

use orchstr8_core::ShutdownReport;
use tracing::warn;

/// Logs every component that failed to stop.
pub fn log_report(report: &ShutdownReport) {
    for (component, error) in report.failures() {
        warn!("{component} did not stop cleanly: {error}");
    }
}
