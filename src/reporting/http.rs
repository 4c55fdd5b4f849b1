//! HTTP run-status sink

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::debug;

use super::{GroupStatusUpdate, ReportingError, RunStatusSink, StatusUpdate};
use crate::http::HttpClient;

/// POSTs status updates as JSON to `<base>/status` and `<base>/groups`
pub struct HttpStatusSink {
    client: HttpClient,
    runtime: Handle,
}

impl HttpStatusSink {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, runtime: Handle) -> anyhow::Result<Self> {
        Ok(Self {
            client: HttpClient::with_timeout(timeout_secs)?.base_url(base_url),
            runtime,
        })
    }

    fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<(), ReportingError> {
        let url = self.client.build_url(path);
        let response = self
            .runtime
            .block_on(self.client.post_json(&url, body))
            .map_err(|e| ReportingError::Http(format!("{e:#}")))?;

        debug!("POST {} -> {}", url, response.status_code);
        if response.is_success() {
            Ok(())
        } else {
            Err(ReportingError::Rejected {
                status: response.status_code,
            })
        }
    }
}

impl RunStatusSink for HttpStatusSink {
    fn report_status(&self, update: &StatusUpdate) -> Result<(), ReportingError> {
        self.post("/status", update)
    }

    fn report_group(&self, update: &GroupStatusUpdate) -> Result<(), ReportingError> {
        self.post("/groups", update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitStatus;

    #[test]
    fn test_unreachable_controller_is_reporting_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let sink = HttpStatusSink::new("http://127.0.0.1:9", 2, runtime.handle().clone()).unwrap();

        let update = StatusUpdate {
            run_id: "r".to_string(),
            group: "G1".to_string(),
            unit_id: "1".to_string(),
            controller: "ctl".to_string(),
            status: UnitStatus::Passed,
            status_code: 0,
            message: "--".to_string(),
        };
        assert!(matches!(
            sink.report_status(&update),
            Err(ReportingError::Http(_))
        ));
    }
}
