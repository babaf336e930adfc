//! Delivery of sensor reports to the relay endpoint.
//!
//! A report gets at most [`MAX_ATTEMPTS`] tries. Only one failure is worth a
//! second try: the relay closing the connection before answering, which
//! happens with relays that drop idle keep-alive connections. Anything else
//! drops the report; reports are never queued for a later cycle.

use std::error::Error as StdError;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE as CONTENT_TYPE_HEADER;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::metrics::SharedMetrics;
use crate::report::{CONTENT_TYPE, SensorReport};
use crate::sensor::SelectedSensors;

/// Upper bound on POST attempts per report.
pub const MAX_ATTEMPTS: u32 = 2;

/// Why a single POST attempt failed.
#[derive(Debug, Error)]
pub enum SendFailure {
    /// The peer closed the connection before a response arrived.
    #[error("connection closed before a response was received: {0}")]
    EndOfStream(reqwest::Error),
    /// Any other transport failure, timeouts included.
    #[error("{0}")]
    Other(reqwest::Error),
}

impl SendFailure {
    /// Sort a transport error into its retry class.
    pub fn classify(err: reqwest::Error) -> Self {
        if !err.is_timeout() && is_end_of_stream(&err) {
            SendFailure::EndOfStream(err)
        } else {
            SendFailure::Other(err)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, SendFailure::EndOfStream(_))
    }
}

/// Walk the error chain looking for an early end of stream.
fn is_end_of_stream(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return true;
            }
        }
        if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        current = e.source();
    }
    false
}

/// What happened to one cycle's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// No relay URL configured; nothing was sent.
    Disabled,
    /// The relay answered (any status).
    Delivered { attempts: u32 },
    /// The report was given up on.
    Dropped { attempts: u32, error: String },
}

/// Sends [`SensorReport`]s to the configured relay.
pub struct ReportRelay {
    url: Option<String>,
    client: reqwest::Client,
    metrics: SharedMetrics,
}

impl ReportRelay {
    /// Create a relay from the resolved configuration.
    ///
    /// The client keeps no idle connections, so every attempt dials a fresh
    /// connection.
    pub fn new(config: &AgentConfig, metrics: SharedMetrics) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .timeout(config.poll.relay_timeout())
            .build()?;

        let url = config.relay_url().map(str::to_string);
        match &url {
            Some(url) => info!(url = %url, "Sensor reports will be relayed"),
            None => info!("No sensor relay URL configured"),
        }

        Ok(Self {
            url,
            client,
            metrics,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    /// Build and deliver the report for one cycle.
    pub async fn send(&self, selected: &SelectedSensors) -> RelayOutcome {
        let Some(url) = self.url.as_deref() else {
            return RelayOutcome::Disabled;
        };

        let report = SensorReport::from_selected(selected);
        let body = match report.to_json() {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize sensor report");
                self.metrics.record_relay_dropped();
                return RelayOutcome::Dropped {
                    attempts: 0,
                    error: e.to_string(),
                };
            }
        };

        debug!(url = %url, "Sending report");

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.post(url, body.clone()).await {
                Ok(status) => {
                    debug!(url = %url, %status, attempts, "Report delivered");
                    self.metrics.record_relay_delivered();
                    return RelayOutcome::Delivered { attempts };
                }
                Err(failure) if failure.is_retryable() && attempts < MAX_ATTEMPTS => {
                    info!(url = %url, attempts, "Relay closed the connection, retrying");
                    self.metrics.record_relay_retry();
                }
                Err(failure) => {
                    error!(url = %url, attempts, error = %failure, "Failed to send report");
                    self.metrics.record_relay_dropped();
                    return RelayOutcome::Dropped {
                        attempts,
                        error: failure.to_string(),
                    };
                }
            }
        }
    }

    /// One POST attempt. The response body is never read.
    async fn post(&self, url: &str, body: Vec<u8>) -> std::result::Result<StatusCode, SendFailure> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE_HEADER, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(SendFailure::classify)?;

        Ok(response.status())
    }
}
