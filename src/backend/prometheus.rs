use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::MetricsBackend;

const CONNECT_ATTEMPTS: usize = 5;
const RETRY_DELAY: Duration = Duration::from_millis(250);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Metrics backend speaking the Prometheus HTTP API.
#[derive(Debug, Clone)]
pub struct PrometheusHttp {
    client: reqwest::Client,
}

impl PrometheusHttp {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .timeout(QUERY_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QuerySample>,
}

#[derive(Debug, Deserialize)]
struct QuerySample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
}

/// `sum by(__name__)({app="web",tier="front"})`
fn names_query(labels: &BTreeMap<String, String>) -> String {
    let selector: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect();
    format!("sum by(__name__)({{{}}})", selector.join(","))
}

fn query_url(endpoint: &str) -> String {
    format!("{}/api/v1/query", endpoint.trim_end_matches('/'))
}

#[async_trait]
impl MetricsBackend for PrometheusHttp {
    async fn reachable(&self, endpoint: &str) -> bool {
        let probe = self
            .client
            .get(endpoint)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match probe {
            Ok(_) => true,
            Err(err) => {
                debug!(endpoint, error = %err, "endpoint not reachable");
                false
            }
        }
    }

    async fn metric_names(
        &self,
        endpoint: &str,
        labels: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<String>> {
        let url = query_url(endpoint);
        let query = names_query(labels);

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self
                .client
                .get(&url)
                .query(&[("query", query.as_str())])
                .send()
                .await
            {
                Ok(response) => break response,
                Err(err) if err.is_connect() && attempt < CONNECT_ATTEMPTS => {
                    warn!(endpoint, attempt, "prometheus not ready, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(anyhow!(err)).with_context(|| format!("querying {url}"));
                }
            }
        };

        let body: QueryResponse = response
            .json()
            .await
            .with_context(|| format!("decoding response from {url}"))?;
        if body.status != "success" {
            bail!(
                "prometheus query failed: {}",
                body.error.unwrap_or_else(|| body.status.clone())
            );
        }
        let names: BTreeSet<String> = body
            .data
            .map(|data| data.result)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|mut sample| sample.metric.remove("__name__"))
            .collect();
        Ok(names.into_iter().collect())
    }
}
