use async_trait::async_trait;
use reqwest::Client;

use crate::adapter::OutboundRequest;
use crate::error::PreBidError;

/// Deadline-agnostic byte exchange with an upstream endpoint. The dispatcher
/// owns the deadline; implementations just send and receive.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn call(&self, request: &OutboundRequest) -> Result<Vec<u8>, PreBidError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn call(&self, request: &OutboundRequest) -> Result<Vec<u8>, PreBidError> {
        let mut builder = self.client.post(&request.uri);
        for (name, value) in &request.headers {
            builder = builder.header(*name, *value);
        }
        let response = builder
            .json(&request.body)
            .send()
            .await
            .map_err(|err| PreBidError::Transport(err.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| PreBidError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
