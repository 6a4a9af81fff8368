//! Metrics sink for transport health faults

use tracing::warn;

/// Faults the coordinator can observe on an agent's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// A stream's timestamps went backwards: an earlier event carried a
    /// larger timestamp than a later one.
    OldTimestampBiggerThanNew,
}

impl TransportFault {
    /// Stable identifier under which the fault is reported.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OldTimestampBiggerThanNew => {
                "TRANSPORT_OLD_TIMESTAMP_BIGGER_THAN_NEW_TIMESTAMP"
            }
        }
    }
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives fault reports from the coordinator.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    fn report_transport_fault(&self, fault: TransportFault, device_id: &str);
}

/// Default sink: one warning per report in the log.
#[derive(Debug, Default)]
pub struct LoggingMetricsSink;

impl MetricsSink for LoggingMetricsSink {
    fn report_transport_fault(&self, fault: TransportFault, device_id: &str) {
        warn!("Transport fault {} on device {}", fault, device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_identifier_spelling() {
        assert_eq!(
            TransportFault::OldTimestampBiggerThanNew.as_str(),
            "TRANSPORT_OLD_TIMESTAMP_BIGGER_THAN_NEW_TIMESTAMP"
        );
        assert_eq!(
            TransportFault::OldTimestampBiggerThanNew.to_string(),
            "TRANSPORT_OLD_TIMESTAMP_BIGGER_THAN_NEW_TIMESTAMP"
        );
    }

    #[test]
    fn test_mock_sink_records_reports() {
        let mut mock = MockMetricsSink::new();
        mock.expect_report_transport_fault()
            .withf(|fault, device_id| {
                *fault == TransportFault::OldTimestampBiggerThanNew && device_id == "serial-1"
            })
            .times(1)
            .return_const(());
        mock.report_transport_fault(TransportFault::OldTimestampBiggerThanNew, "serial-1");
    }
}
