//! Best-effort fan-out of applicant records to every subscriber endpoint
//! of a mailbox.
//!
//! One POST per (record, endpoint) pair. A failure is logged and reported in
//! its outcome; it never affects the other pairs. No retries.

use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::DeliveryError;
use crate::extract::ApplicantRecord;
use crate::store::SubscriberEndpoint;

/// Bounds on concurrent deliveries.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_in_flight: usize,
    pub delivery_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RelayConfig> for DispatchOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight_deliveries,
            delivery_timeout: config.delivery_timeout,
        }
    }
}

/// Result of delivering one record to one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub endpoint: SubscriberEndpoint,
    pub record: ApplicantRecord,
    pub success: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<DeliveryError>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<DeliveryError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Posts applicant records as JSON.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        Self::with_client(reqwest::Client::new(), options)
    }

    pub fn with_client(client: reqwest::Client, options: DispatchOptions) -> Self {
        Self { client, options }
    }

    /// Deliver every record to every endpoint.
    ///
    /// Returns one outcome per pair, in no particular order.
    pub async fn dispatch(
        &self,
        records: &[ApplicantRecord],
        endpoints: &[SubscriberEndpoint],
    ) -> Vec<DispatchOutcome> {
        if records.is_empty() || endpoints.is_empty() {
            return Vec::new();
        }

        // Collected first: a lazily mapped stream over borrowed pairs is not `Send`.
        let deliveries: Vec<_> = records
            .iter()
            .flat_map(|record| endpoints.iter().map(move |endpoint| (record, endpoint)))
            .map(|(record, endpoint)| async move {
                let result = self.deliver(record, endpoint).await;
                DispatchOutcome {
                    endpoint: endpoint.clone(),
                    record: record.clone(),
                    success: result.is_ok(),
                    error: result.err(),
                }
            })
            .collect();

        let outcomes: Vec<DispatchOutcome> = stream::iter(deliveries)
            .buffer_unordered(self.options.max_in_flight.max(1))
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.success).count();
        info!(
            records = records.len(),
            endpoints = endpoints.len(),
            delivered = outcomes.len() - failed,
            failed,
            "Dispatch finished"
        );
        outcomes
    }

    async fn deliver(
        &self,
        record: &ApplicantRecord,
        endpoint: &SubscriberEndpoint,
    ) -> Result<(), DeliveryError> {
        let url = &endpoint.url;
        let response = self
            .client
            .post(url)
            .timeout(self.options.delivery_timeout)
            .json(record)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout {
                        url: url.clone(),
                        after: self.options.delivery_timeout,
                    }
                } else {
                    DeliveryError::Transport {
                        url: url.clone(),
                        reason: e.to_string(),
                    }
                }
            });

        let result = response.and_then(|response| {
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(DeliveryError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                })
            }
        });

        match &result {
            Ok(()) => debug!(endpoint = %endpoint.name, url = %url, applicant = %record.email, "Delivered"),
            Err(e) => warn!(
                endpoint = %endpoint.name,
                url = %url,
                applicant = %record.email,
                error = %e,
                "Delivery failed"
            ),
        }
        result
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatchOptions::default())
    }
}
