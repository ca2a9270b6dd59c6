use axum::{routing::post, Json, Router};
use rand::Rng;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tracing::info;

use crate::openrtb::request::BidRequest;
use crate::openrtb::response::{Bid, BidResponse, SeatBid};

/// Simulates one upstream bidder for local runs: answers OpenRTB requests
/// with randomized latency and prices keyed off the requested placement.
async fn handle_bid(Json(request): Json<BidRequest>) -> Json<BidResponse> {
    info!(
        "mock bidder received request: id={}, imp_count={}",
        request.id,
        request.imp.len()
    );

    let delay_ms = rand::thread_rng().gen_range(20..120);
    sleep(Duration::from_millis(delay_ms)).await;

    let mut bids = Vec::new();
    for imp in &request.imp {
        let bid_id = format!("bid-{}", imp.id);

        let price = if let Some(banner) = &imp.banner {
            // Leaderboards clear lower than MPUs, as they would in the wild.
            if banner.w == Some(728) && banner.h == Some(90) {
                rand::thread_rng().gen_range(0.3..2.0)
            } else {
                rand::thread_rng().gen_range(0.5..8.0)
            }
        } else if imp.video.is_some() {
            rand::thread_rng().gen_range(2.0..15.0)
        } else {
            rand::thread_rng().gen_range(0.5..4.0)
        };

        let adm = if imp.video.is_some() {
            format!(
                r#"<VAST version="3.0"><Ad id="{bid_id}"><InLine><AdSystem>Mock Bidder</AdSystem><AdTitle>Mock Video Ad</AdTitle><Creatives><Creative><Linear><Duration>00:00:30</Duration><MediaFiles><MediaFile delivery="progressive" type="video/mp4" width="640" height="360">http://example.com/video.mp4</MediaFile></MediaFiles></Linear></Creative></Creatives></InLine></Ad></VAST>"#
            )
        } else {
            format!("<html><body>Mock Bidder Ad {bid_id}</body></html>")
        };

        bids.push(Bid {
            id: bid_id,
            impid: imp.id.clone(),
            price: (price * 100.0_f64).round() / 100.0,
            adm: Some(adm),
            crid: Some(format!("crid-{}", rand::thread_rng().gen_range(1..1000))),
            w: imp.banner.as_ref().and_then(|banner| banner.w),
            h: imp.banner.as_ref().and_then(|banner| banner.h),
            ..Bid::default()
        });
    }

    Json(BidResponse {
        id: request.id.clone(),
        seatbid: vec![SeatBid {
            bid: bids,
            seat: Some("mock_seat".to_string()),
        }],
        cur: Some("USD".to_string()),
        nbr: None,
    })
}

/// Starts the mock bidder on the given port with a single `/bid` route.
pub async fn start_mock_bidder_server(port: u16) {
    let app = Router::new().route("/bid", post(handle_bid));

    let addr = format!("0.0.0.0:{}", port);
    info!("mock bidder running at http://{}", addr);

    let listener = TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
