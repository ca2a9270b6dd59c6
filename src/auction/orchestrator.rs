use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;
use tokio::time::Instant;

use crate::adapter::catalog::AdapterCatalog;
use crate::auction::transport::HttpTransport;
use crate::auction::{aggregator, dispatcher};
use crate::cache::{self, BidCache};
use crate::cookie::service::UidsCookieService;
use crate::cookie::uids::UidsCookie;
use crate::error::PreBidError;
use crate::logging::runtime_logger::RuntimeLogger;
use crate::metrics;
use crate::model::context::{PreBidContext, RequestHeaders};
use crate::model::request::AuctionRequest;
use crate::model::response::PreBidResponse;
use crate::settings::ApplicationSettings;

/// Top-level auction sequence: resolve account, build per-bidder requests,
/// dispatch, aggregate, optionally cache, assemble the response.
///
/// Shared read-only across all in-flight auctions; all per-auction state
/// lives in the [`PreBidContext`] created per call.
pub struct AuctionOrchestrator {
    settings: Arc<dyn ApplicationSettings>,
    catalog: Arc<AdapterCatalog>,
    transport: Arc<dyn HttpTransport>,
    cache: Arc<dyn BidCache>,
    cookie_service: Arc<UidsCookieService>,
    trail: Option<Arc<RuntimeLogger>>,
}

impl AuctionOrchestrator {
    pub fn new(
        settings: Arc<dyn ApplicationSettings>,
        catalog: Arc<AdapterCatalog>,
        transport: Arc<dyn HttpTransport>,
        cache: Arc<dyn BidCache>,
        cookie_service: Arc<UidsCookieService>,
        trail: Option<Arc<RuntimeLogger>>,
    ) -> Self {
        Self {
            settings,
            catalog,
            transport,
            cache,
            cookie_service,
            trail,
        }
    }

    /// Runs one auction. The caller always gets a well-formed response plus
    /// the rewritten uids Set-Cookie value; every pipeline failure is folded
    /// into the response's status string.
    pub async fn process(
        &self,
        request: AuctionRequest,
        headers: RequestHeaders,
        cookies: HashMap<String, String>,
    ) -> (PreBidResponse, String) {
        let started = Instant::now();
        let tid = request.tid.clone().unwrap_or_default();

        let uids_cookie = self.cookie_service.parse_from_cookies(&cookies);
        let set_cookie = self.cookie_service.to_set_cookie(&uids_cookie);

        let auction = self.run_auction(request, &headers, uids_cookie);
        let response = match AssertUnwindSafe(auction).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                metrics::inc_error_requests();
                PreBidResponse::with_status(tid, status_for(&err))
            }
            Err(_) => {
                metrics::inc_error_requests();
                PreBidResponse::with_status(tid, "Unexpected server error")
            }
        };

        metrics::observe_request_time(started.elapsed().as_millis() as u64);
        (response, set_cookie)
    }

    async fn run_auction(
        &self,
        request: AuctionRequest,
        headers: &RequestHeaders,
        uids_cookie: UidsCookie,
    ) -> Result<PreBidResponse, PreBidError> {
        let context = Arc::new(PreBidContext::from_request(request, headers, uids_cookie)?);

        metrics::inc_requests(&context.account_id, context.app.is_some());
        if context.no_live_uids {
            metrics::inc_no_cookie_requests();
        }

        let account = self
            .settings
            .account_by_id(&context.account_id, &context.timeout)
            .await?;

        let mut pairs = Vec::new();
        let mut unsupported = Vec::new();
        for bidder in &context.bidders {
            match self.catalog.by_code(&bidder.bidder_code) {
                Some(adapter) => pairs.push((bidder.clone(), adapter)),
                None => unsupported.push(bidder.bidder_code.clone()),
            }
        }

        let results =
            dispatcher::dispatch(pairs, Arc::clone(&context), Arc::clone(&self.transport)).await;
        for result in &results {
            metrics::observe_bidder_status(&context.account_id, &result.bidder_status, &result.bids);
        }

        let (mut bids, statuses) = aggregator::merge(&context, results, unsupported);

        if context.cache_markup && !bids.is_empty() {
            let cached = self.cache.cache_bids(&bids, &context.timeout).await?;
            cache::apply_cache_results(&mut bids, &cached);
        }

        if context.sort_bids {
            aggregator::assign_targeting(&mut bids, &account);
        }

        let status = if context.no_live_uids { "no_cookie" } else { "OK" };

        if let Some(trail) = &self.trail {
            let entry = json!({
                "request_id": context.tid,
                "auction_status": status,
                "bids_returned": bids.len(),
                "bidder_status": statuses.iter().map(|s| json!({
                    "bidder": s.bidder,
                    "response_time_ms": s.response_time_ms,
                    "num_bids": s.num_bids,
                    "error": s.error,
                    "timed_out": s.timed_out,
                })).collect::<Vec<_>>(),
            });
            trail.log("INFO", &entry.to_string()).await;
        }

        Ok(PreBidResponse {
            tid: context.tid.clone(),
            status: status.to_string(),
            bidder_status: statuses,
            bids,
        })
    }
}

fn status_for(error: &PreBidError) -> String {
    match error {
        PreBidError::UnknownAccount => "Unknown account id: Unknown account".to_string(),
        PreBidError::Validation(message) => format!("Error parsing request: {message}"),
        PreBidError::Cache(message) => format!("Prebid cache failed: {message}"),
        PreBidError::Timeout => "Prebid cache failed: Timed out".to_string(),
        _ => "Unexpected server error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::adapter::appnexus::AppnexusAdapter;
    use crate::adapter::pulsepoint::PulsepointAdapter;
    use crate::adapter::{Adapter, OutboundRequest};
    use crate::auction::timeout::GlobalTimeout;
    use crate::cache::BidCacheResult;
    use crate::model::request::{AdUnit, AdUnitBidEntry};
    use crate::model::response::Bid;
    use crate::openrtb::request::Format;
    use crate::settings::Account;

    // stands for {"uids":{"pulsepoint":"PP-UID","adnxs":"12345"}}
    fn uids_cookie_value() -> String {
        use base64::engine::general_purpose::URL_SAFE;
        use base64::Engine as _;
        URL_SAFE.encode(r#"{"uids":{"pulsepoint":"PP-UID","adnxs":"12345"}}"#)
    }

    struct FakeSettings {
        known: Option<Account>,
    }

    #[async_trait]
    impl ApplicationSettings for FakeSettings {
        async fn account_by_id(
            &self,
            _account_id: &str,
            _deadline: &GlobalTimeout,
        ) -> Result<Account, PreBidError> {
            self.known.clone().ok_or(PreBidError::UnknownAccount)
        }
    }

    struct RoutedTransport {
        routes: HashMap<String, serde_json::Value>,
    }

    #[async_trait]
    impl HttpTransport for RoutedTransport {
        async fn call(&self, request: &OutboundRequest) -> Result<Vec<u8>, PreBidError> {
            self.routes
                .get(&request.uri)
                .map(|body| body.to_string().into_bytes())
                .ok_or_else(|| PreBidError::Transport("connection refused".to_string()))
        }
    }

    struct FakeCache {
        fail: bool,
    }

    #[async_trait]
    impl BidCache for FakeCache {
        async fn cache_bids(
            &self,
            bids: &[Bid],
            _deadline: &GlobalTimeout,
        ) -> Result<Vec<BidCacheResult>, PreBidError> {
            if self.fail {
                return Err(PreBidError::Cache("http exception".to_string()));
            }
            Ok(bids
                .iter()
                .enumerate()
                .map(|(index, _)| BidCacheResult {
                    cache_id: format!("uuid-{index}"),
                    cache_url: format!("http://cache/?uuid=uuid-{index}"),
                })
                .collect())
        }
    }

    fn catalog() -> Arc<AdapterCatalog> {
        Arc::new(AdapterCatalog::new(vec![
            Arc::new(PulsepointAdapter::new("http://pp/bid", "http://pp/s?", "http://x")),
            Arc::new(AppnexusAdapter::new("http://an/bid", "http://an/s?", "http://x")),
        ]))
    }

    fn orchestrator(
        account: Option<Account>,
        routes: HashMap<String, serde_json::Value>,
        cache_fails: bool,
    ) -> AuctionOrchestrator {
        AuctionOrchestrator::new(
            Arc::new(FakeSettings { known: account }),
            catalog(),
            Arc::new(RoutedTransport { routes }),
            Arc::new(FakeCache { fail: cache_fails }),
            Arc::new(UidsCookieService::new(None, None, None, None, None)),
            None,
        )
    }

    fn default_account() -> Option<Account> {
        Some(Account {
            id: "acct-1".to_string(),
            price_granularity: None,
        })
    }

    fn request_with(bidders: Vec<(&str, serde_json::Value)>) -> AuctionRequest {
        AuctionRequest {
            tid: Some("tid".to_string()),
            account_id: Some("acct-1".to_string()),
            timeout_millis: Some(1000),
            ad_units: vec![AdUnit {
                code: "slot-1".to_string(),
                sizes: vec![Format { w: 300, h: 250 }],
                bids: bidders
                    .into_iter()
                    .map(|(bidder, params)| AdUnitBidEntry {
                        bidder: bidder.to_string(),
                        params: Some(params),
                        bid_id: Some(format!("bid-{bidder}")),
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn pulsepoint_params() -> serde_json::Value {
        json!({"cp": 321, "ct": 51, "cf": "300x250"})
    }

    fn bid_response(impid: &str, price: f64) -> serde_json::Value {
        json!({
            "id": "resp",
            "seatbid": [{"bid": [{"id": "1", "impid": impid, "price": price, "adm": "<div/>"}]}]
        })
    }

    fn synced_cookies() -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        cookies.insert("uids".to_string(), uids_cookie_value());
        cookies
    }

    #[tokio::test]
    async fn unknown_account_short_circuits_before_dispatch() {
        let orchestrator = orchestrator(None, HashMap::new(), false);
        let (response, _) = orchestrator
            .process(
                request_with(vec![("pulsepoint", pulsepoint_params())]),
                RequestHeaders::default(),
                synced_cookies(),
            )
            .await;
        assert_eq!(response.status, "Unknown account id: Unknown account");
        assert!(response.bidder_status.is_empty());
    }

    #[tokio::test]
    async fn invalid_request_reports_parsing_status() {
        let orchestrator = orchestrator(default_account(), HashMap::new(), false);
        let mut request = request_with(vec![("pulsepoint", pulsepoint_params())]);
        request.ad_units.clear();
        let (response, _) = orchestrator
            .process(request, RequestHeaders::default(), synced_cookies())
            .await;
        assert_eq!(
            response.status,
            "Error parsing request: ad_units are required"
        );
    }

    #[tokio::test]
    async fn no_live_uids_yield_no_cookie_status() {
        let mut routes = HashMap::new();
        routes.insert("http://pp/bid".to_string(), bid_response("slot-1", 5.67));
        let orchestrator = orchestrator(default_account(), routes, false);
        let (response, _) = orchestrator
            .process(
                request_with(vec![("pulsepoint", pulsepoint_params())]),
                RequestHeaders::default(),
                HashMap::new(),
            )
            .await;
        assert_eq!(response.status, "no_cookie");
        // the auction still ran
        assert_eq!(response.bidder_status.len(), 1);
    }

    #[tokio::test]
    async fn statuses_cover_every_requested_bidder() {
        let mut routes = HashMap::new();
        routes.insert("http://pp/bid".to_string(), bid_response("slot-1", 5.67));
        let orchestrator = orchestrator(default_account(), routes, false);
        let (response, _) = orchestrator
            .process(
                request_with(vec![
                    ("pulsepoint", pulsepoint_params()),
                    ("unsupported", json!({})),
                ]),
                RequestHeaders::default(),
                synced_cookies(),
            )
            .await;

        assert_eq!(response.status, "OK");
        assert_eq!(response.bidder_status.len(), 2);
        let unsupported = response
            .bidder_status
            .iter()
            .find(|status| status.bidder == "unsupported")
            .unwrap();
        assert_eq!(unsupported.error.as_deref(), Some("Unsupported bidder"));
        assert_eq!(response.bids.len(), 1);
    }

    #[tokio::test]
    async fn failing_bidder_does_not_affect_the_other() {
        let mut routes = HashMap::new();
        // appnexus routed, pulsepoint unreachable
        routes.insert("http://an/bid".to_string(), bid_response("slot-1", 6.35));
        let orchestrator = orchestrator(default_account(), routes, false);
        let (response, _) = orchestrator
            .process(
                request_with(vec![
                    ("pulsepoint", pulsepoint_params()),
                    ("appnexus", json!({"placement_id": 42})),
                ]),
                RequestHeaders::default(),
                synced_cookies(),
            )
            .await;

        assert_eq!(response.status, "OK");
        assert_eq!(response.bids.len(), 1);
        assert_eq!(response.bids[0].bidder, "appnexus");
        let failed = response
            .bidder_status
            .iter()
            .find(|status| status.bidder == "pulsepoint")
            .unwrap();
        assert_eq!(failed.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn sorted_bids_get_winner_keys_for_the_higher_price() {
        let mut routes = HashMap::new();
        routes.insert("http://pp/bid".to_string(), bid_response("slot-1", 5.67));
        routes.insert("http://an/bid".to_string(), bid_response("slot-1", 6.35));
        let orchestrator = orchestrator(default_account(), routes, false);
        let mut request = request_with(vec![
            ("pulsepoint", pulsepoint_params()),
            ("appnexus", json!({"placement_id": 42})),
        ]);
        request.sort_bids = Some(1);
        let (response, _) = orchestrator
            .process(request, RequestHeaders::default(), synced_cookies())
            .await;

        assert_eq!(response.bids.len(), 2);
        assert_eq!(response.bids[0].price, 6.35);
        let targeting = response.bids[0].ad_server_targeting.as_ref().unwrap();
        assert_eq!(targeting.get("hb_bidder").map(String::as_str), Some("appnexus"));
        assert_eq!(targeting.get("hb_pb").map(String::as_str), Some("6.30"));
        assert!(response.bids[1].ad_server_targeting.is_none());
    }

    #[tokio::test]
    async fn cache_failure_is_fatal_to_the_response() {
        let mut routes = HashMap::new();
        routes.insert("http://pp/bid".to_string(), bid_response("slot-1", 5.67));
        let orchestrator = orchestrator(default_account(), routes, true);
        let mut request = request_with(vec![("pulsepoint", pulsepoint_params())]);
        request.cache_markup = Some(1);
        let (response, _) = orchestrator
            .process(request, RequestHeaders::default(), synced_cookies())
            .await;

        assert_eq!(response.status, "Prebid cache failed: http exception");
        assert!(response.bids.is_empty());
    }

    #[tokio::test]
    async fn cached_bids_swap_markup_for_handles() {
        let mut routes = HashMap::new();
        routes.insert("http://pp/bid".to_string(), bid_response("slot-1", 5.67));
        let orchestrator = orchestrator(default_account(), routes, false);
        let mut request = request_with(vec![("pulsepoint", pulsepoint_params())]);
        request.cache_markup = Some(1);
        let (response, _) = orchestrator
            .process(request, RequestHeaders::default(), synced_cookies())
            .await;

        assert_eq!(response.status, "OK");
        let bid = &response.bids[0];
        assert_eq!(bid.cache_id.as_deref(), Some("uuid-0"));
        assert_eq!(bid.cache_url.as_deref(), Some("http://cache/?uuid=uuid-0"));
        assert!(bid.adm.is_none());
        assert!(bid.nurl.is_none());
    }

    #[tokio::test]
    async fn no_bids_skip_the_cache_entirely() {
        // cache would fail if called; with no bids it must not be
        let orchestrator = orchestrator(default_account(), HashMap::new(), true);
        let mut request = request_with(vec![("pulsepoint", pulsepoint_params())]);
        request.cache_markup = Some(1);
        let (response, _) = orchestrator
            .process(request, RequestHeaders::default(), synced_cookies())
            .await;
        // bidder failed (no route), but cache was never consulted
        assert_eq!(response.status, "OK");
    }

    #[tokio::test]
    async fn response_always_carries_rewritten_cookie() {
        let orchestrator = orchestrator(None, HashMap::new(), false);
        let (_, set_cookie) = orchestrator
            .process(
                request_with(vec![("pulsepoint", pulsepoint_params())]),
                RequestHeaders::default(),
                synced_cookies(),
            )
            .await;
        assert!(set_cookie.starts_with("uids="));
        assert!(set_cookie.contains("Max-Age="));
    }
}
