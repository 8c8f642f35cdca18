//! Endpoints of HTTP server.
//!
use std::convert::Infallible;

use axum::{
    body::StreamBody,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Extension, Router,
};
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::display::DisplayHandle;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>speakcam</title>
</head>
<body>
    <h3>Live object detection</h3>
    <p id="loading">Loading camera and model...</p>
    <img src="./stream" width="100%"
         onload="document.getElementById('loading').style.display = 'none'">
    <p>Detected objects: <span id="detected-count">0</span></p>
    <script>
        setInterval(async () => {
            const resp = await fetch('./count');
            document.getElementById('detected-count').textContent = await resp.text();
        }, 500);
    </script>
</body>
</html>
"#;

/// Build the router serving the display.
pub fn router(display: DisplayHandle) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(annotated_stream))
        .route("/count", get(detected_count))
        .layer(Extension(display))
}

/// Page showing the annotated stream and the detection count.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Number of detections in the latest frame.
pub async fn detected_count(Extension(display): Extension<DisplayHandle>) -> String {
    display.count().to_string()
}

/// Annotated frames as `multipart/x-mixed-replace` stream.
pub async fn annotated_stream(Extension(display): Extension<DisplayHandle>) -> impl IntoResponse {
    log::info!("Annotated stream requested");

    // Viewers lagging behind skip frames instead of ending the stream
    let stream = BroadcastStream::new(display.subscribe())
        .filter_map(|item| async move { item.ok() })
        .map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}
