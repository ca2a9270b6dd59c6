use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::auction::timeout::GlobalTimeout;
use crate::error::PreBidError;
use crate::model::response::Bid;

/// Handle returned by the external content cache for one stored creative.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BidCacheResult {
    pub cache_id: String,
    pub cache_url: String,
}

/// External creative cache. Unlike bidder calls, a failure here is fatal to
/// the whole auction response once caching was requested.
#[async_trait]
pub trait BidCache: Send + Sync {
    /// Stores every bid's markup; the result vector is positionally parallel
    /// to the input bids.
    async fn cache_bids(
        &self,
        bids: &[Bid],
        deadline: &GlobalTimeout,
    ) -> Result<Vec<BidCacheResult>, PreBidError>;
}

#[derive(Serialize, Debug)]
struct BidCacheRequest {
    puts: Vec<PutObject>,
}

#[derive(Serialize, Debug)]
struct PutObject {
    value: PutValue,
}

#[derive(Serialize, Debug)]
struct PutValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    adm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nurl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct BidCacheResponse {
    responses: Vec<CacheObject>,
}

#[derive(Deserialize, Debug)]
struct CacheObject {
    uuid: String,
}

pub struct PrebidCache {
    client: Client,
    endpoint: String,
    cached_asset_url: String,
}

impl PrebidCache {
    pub fn new(endpoint: &str, cached_asset_url: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            cached_asset_url: cached_asset_url.to_string(),
        }
    }

    fn cached_asset_url_for(&self, uuid: &str) -> String {
        format!("{}?uuid={uuid}", self.cached_asset_url)
    }
}

#[async_trait]
impl BidCache for PrebidCache {
    async fn cache_bids(
        &self,
        bids: &[Bid],
        deadline: &GlobalTimeout,
    ) -> Result<Vec<BidCacheResult>, PreBidError> {
        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(PreBidError::Timeout);
        }

        let request = BidCacheRequest {
            puts: bids
                .iter()
                .map(|bid| PutObject {
                    value: PutValue {
                        adm: bid.adm.clone(),
                        nurl: bid.nurl.clone(),
                        width: bid.width,
                        height: bid.height,
                    },
                })
                .collect(),
        };

        let send = self.client.post(&self.endpoint).json(&request).send();
        let response = timeout(remaining, send)
            .await
            .map_err(|_| PreBidError::Timeout)?
            .map_err(|err| PreBidError::Cache(err.to_string()))?;
        let decoded: BidCacheResponse = response
            .json()
            .await
            .map_err(|err| PreBidError::Cache(err.to_string()))?;

        if decoded.responses.len() != bids.len() {
            return Err(PreBidError::Cache(
                "The number of returned cache ids doesn't match the number of bids".to_string(),
            ));
        }

        Ok(decoded
            .responses
            .into_iter()
            .map(|object| BidCacheResult {
                cache_url: self.cached_asset_url_for(&object.uuid),
                cache_id: object.uuid,
            })
            .collect())
    }
}

/// Writes cache handles into their bids, matched positionally. Raw markup
/// and the win-notice url are cleared: the cache is now the source of truth
/// for creative content.
pub fn apply_cache_results(bids: &mut [Bid], results: &[BidCacheResult]) {
    for (bid, result) in bids.iter_mut().zip(results) {
        bid.cache_id = Some(result.cache_id.clone());
        bid.cache_url = Some(result.cache_url.clone());
        bid.adm = None;
        bid.nurl = None;
    }
}
