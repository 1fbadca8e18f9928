//! The real network behind the gateway.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method};

use super::{GatewayError, GatewayRequest, GatewayResponse, GatewayResult};

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Performs requests the gateway decided to send to the network.
///
/// `Err` means the network could not be reached; HTTP error statuses are
/// ordinary responses.
pub trait Upstream: Clone + Send + Sync + 'static {
    fn fetch(
        &self,
        request: &GatewayRequest,
    ) -> impl Future<Output = GatewayResult<GatewayResponse>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|error| GatewayError::Network(error.to_string()))?;
        Ok(Self { client })
    }
}

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

impl Upstream for HttpUpstream {
    async fn fetch(&self, request: &GatewayRequest) -> GatewayResult<GatewayResponse> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|error| GatewayError::InvalidRequest(error.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                builder = builder.header(name, value);
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| GatewayError::Network(error.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|error| GatewayError::Network(error.to_string()))?;

        Ok(GatewayResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
