//! Report generation delegated to an external HTTP service

use async_trait::async_trait;
use cryo_core::{Error, ExitStatus, Result};
use cryo_utils::tracing::generation_span;
use cryo_utils::write_atomic;
use reqwest::multipart::{Form, Part};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Instrument};
use url::Url;

use crate::generator::ReportGenerator;

/// Uploads recordings to `{endpoint}/report` and stores the returned report
#[derive(Debug, Clone)]
pub struct RemoteReportGenerator {
    endpoint: Url,
    client: reqwest::Client,
}

impl RemoteReportGenerator {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::network(endpoint.as_str(), e.to_string()))?;

        Ok(Self { endpoint, client })
    }

    fn report_url(&self) -> String {
        format!("{}/report", self.endpoint.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl ReportGenerator for RemoteReportGenerator {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn exec(&self, recording: &Path, destination: &Path, filter: &str) -> Result<PathBuf> {
        let span = generation_span(&recording.display().to_string(), self.name());
        async move {
            let file_name = recording
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "recording".to_string());

            let content = match tokio::fs::read(recording).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(Error::archived_not_found(file_name));
                }
                Err(e) => return Err(Error::file_system(recording, "read recording", e)),
            };

            let mut form = Form::new().part("file", Part::bytes(content).file_name(file_name));
            if !filter.is_empty() {
                form = form.text("filter", filter.to_string());
            }

            let url = self.report_url();
            let response = self
                .client
                .post(&url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        Error::generation(ExitStatus::TimedOut, format!("{url}: {e}"))
                    } else {
                        Error::network(&url, e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::network(
                    &url,
                    format!("report generation failed: {status} {}", body.trim()),
                ));
            }

            let report = response
                .bytes()
                .await
                .map_err(|e| Error::network(&url, e.to_string()))?;

            let target = destination.to_path_buf();
            tokio::task::spawn_blocking(move || write_atomic(&target, &report))
                .await
                .map_err(|e| {
                    Error::file_system(destination, "write report", std::io::Error::other(e))
                })??;

            info!(bytes = report_len(destination), "report generated");
            Ok(destination.to_path_buf())
        }
        .instrument(span)
        .await
    }
}

fn report_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn generator_for(server: &MockServer, timeout: Duration) -> RemoteReportGenerator {
        RemoteReportGenerator::new(Url::parse(&server.uri()).unwrap(), timeout).unwrap()
    }

    #[tokio::test]
    async fn uploads_recording_and_filter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/report"))
            .and(body_string_contains("name=\"file\"; filename=\"foo.jfr\""))
            .and(body_string_contains("name=\"filter\""))
            .and(body_string_contains("cpu,heap"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"CpuLoad\":{}}"))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let recording = temp.path().join("foo.jfr");
        std::fs::write(&recording, "{\"type\":\"CPULoad\"}\n").unwrap();
        let destination = temp.path().join("reports/foo.report.json");

        let generator = generator_for(&server, Duration::from_secs(5)).await;
        let written = generator
            .exec(&recording, &destination, "cpu,heap")
            .await
            .unwrap();

        assert_eq!(written, destination);
        assert_eq!(
            std::fs::read_to_string(&destination).unwrap(),
            "{\"CpuLoad\":{}}"
        );
    }

    #[tokio::test]
    async fn server_errors_leave_no_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/report"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let recording = temp.path().join("foo.jfr");
        std::fs::write(&recording, "").unwrap();
        let destination = temp.path().join("foo.report.json");

        let err = generator_for(&server, Duration::from_secs(5))
            .await
            .exec(&recording, &destination, "")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network { .. }));
        assert!(err.to_string().contains("500"));
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let recording = temp.path().join("foo.jfr");
        std::fs::write(&recording, "").unwrap();

        let err = generator_for(&server, Duration::from_millis(200))
            .await
            .exec(&recording, &temp.path().join("out.json"), "")
            .await
            .unwrap_err();
        assert_eq!(err.exit_status(), Some(ExitStatus::TimedOut));
    }

    #[tokio::test]
    async fn missing_recording_is_not_found() {
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();

        let err = generator_for(&server, Duration::from_secs(1))
            .await
            .exec(&temp.path().join("gone.jfr"), &temp.path().join("out.json"), "")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
