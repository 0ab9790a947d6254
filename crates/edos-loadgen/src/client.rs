//! HTTP request sender backed by a pooled hyper client.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use edos_core::{BoxFuture, Endpoint};

use crate::sender::{RequestOutcome, RequestSender};

/// Issues `GET <endpoint><path>` with keep-alive connection reuse.
#[derive(Clone)]
pub struct HttpRequestSender {
    client: Client<HttpConnector, Empty<Bytes>>,
    path: String,
    timeout: Duration,
}

impl HttpRequestSender {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            path: path.into(),
            timeout,
        }
    }

    async fn get(&self, endpoint: &Endpoint) -> RequestOutcome {
        let url = endpoint.url(&self.path);

        let req = match http::Request::builder()
            .method(http::Method::GET)
            .uri(url.as_str())
            .header(http::header::USER_AGENT, "edos-loadgen/0.1")
            .body(Empty::<Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %url, "invalid load request");
                return RequestOutcome::Failed;
            }
        };

        let resp = match self.client.request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, %url, "load request failed");
                return RequestOutcome::Failed;
            }
        };

        let status = resp.status();
        // Drain the body so the connection goes back to the pool.
        if let Err(e) = resp.into_body().collect().await {
            debug!(error = %e, %url, "load response body failed");
            return RequestOutcome::Failed;
        }

        if status.is_success() {
            RequestOutcome::Success(status.as_u16())
        } else {
            debug!(%status, %url, "load request non-2xx");
            RequestOutcome::Rejected(status.as_u16())
        }
    }
}

impl RequestSender for HttpRequestSender {
    fn send<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, RequestOutcome> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.get(endpoint)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    debug!(%endpoint, timeout_ms = self.timeout.as_millis() as u64, "load request timed out");
                    RequestOutcome::Failed
                }
            }
        })
    }
}
