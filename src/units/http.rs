//! `http` unit kind

use anyhow::{Context, Result};

use super::{Unit, UnitContext};
use crate::http::{HttpClient, HttpRequest};

/// Sends a request to `url` and checks status and body
#[derive(Default)]
pub struct HttpCheckUnit {
    client: Option<HttpClient>,
    request: Option<HttpRequest>,
    expect_status: u16,
    body_contains: Option<String>,
}

impl Unit for HttpCheckUnit {
    fn required_inputs(&self) -> &[&str] {
        &["url"]
    }

    fn setup(&mut self, ctx: &mut UnitContext) -> Result<()> {
        let url = ctx.require_str("url")?;
        let method = ctx.input_str("method").unwrap_or("GET").to_uppercase();
        let mut request = HttpRequest::new(method, url);
        if let Some(body) = ctx.input_str("body") {
            request = request.body(body);
        }

        self.expect_status = match ctx.input_u64("expectStatus") {
            Some(status) => u16::try_from(status).context("input 'expectStatus' out of range")?,
            None => 200,
        };
        self.body_contains = ctx.input_str("bodyContains").map(str::to_string);
        self.client = Some(HttpClient::with_timeout(
            ctx.input_u64("timeoutSecs").unwrap_or(30),
        )?);
        self.request = Some(request);
        Ok(())
    }

    fn run(&mut self, ctx: &mut UnitContext) -> Result<()> {
        let (client, request) = match (&self.client, &self.request) {
            (Some(client), Some(request)) => (client, request.clone()),
            _ => anyhow::bail!("http unit was not set up"),
        };

        let url = request.url.clone();
        let response = ctx.block_on(client.send(request))??;

        anyhow::ensure!(
            response.status_code == self.expect_status,
            "{url} returned {}, expected {}",
            response.status_code,
            self.expect_status
        );
        if let Some(text) = &self.body_contains {
            anyhow::ensure!(
                response.body_contains(text),
                "response body of {url} does not contain '{text}'"
            );
        }

        ctx.set_message(format!(
            "{} in {}ms",
            response.status_code, response.duration_ms
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Inputs;
    use serde_json::json;

    #[test]
    fn test_run_without_setup_fails() {
        let mut ctx = UnitContext::new("G", "h", Inputs::new());
        let err = HttpCheckUnit::default().run(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("not set up"));
    }

    #[test]
    fn test_setup_rejects_out_of_range_status() {
        let inputs: Inputs =
            serde_json::from_value(json!({ "url": "http://localhost/", "expectStatus": 70000 }))
                .unwrap();
        let mut ctx = UnitContext::new("G", "h", inputs);
        assert!(HttpCheckUnit::default().setup(&mut ctx).is_err());
    }

    #[test]
    fn test_unreachable_endpoint_fails() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let inputs: Inputs = serde_json::from_value(json!({
            "url": "http://127.0.0.1:9/health",
            "timeoutSecs": 2,
        }))
        .unwrap();
        let mut ctx =
            UnitContext::new("G", "h", inputs).with_runtime(Some(runtime.handle().clone()));

        let mut unit = HttpCheckUnit::default();
        unit.setup(&mut ctx).unwrap();
        assert!(unit.run(&mut ctx).is_err());
    }
}
