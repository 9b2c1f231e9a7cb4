use std::{convert::Infallible, sync::Arc};

use axum::{http::Request, response::Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::info;

use crate::status::ServerStats;

/// Counts every request that reaches the router, whatever its outcome, and
/// logs one access line per response.
#[derive(Clone)]
pub struct RequestCounterLayer {
    stats: Arc<ServerStats>,
}

pub fn request_counter_layer(stats: Arc<ServerStats>) -> RequestCounterLayer {
    RequestCounterLayer { stats }
}

impl<S> Layer<S> for RequestCounterLayer {
    type Service = RequestCounterService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestCounterService {
            inner,
            stats: self.stats.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestCounterService<S> {
    inner: S,
    stats: Arc<ServerStats>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RequestCounterService<S>
where
    S: Service<Request<ReqBody>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        let tally = RequestTally(self.stats.clone());
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        Box::pin(async move {
            // Counted when the future finishes or is dropped, so a status body
            // reports the count before itself and cancelled requests still count.
            let _tally = tally;
            let response = inner.call(request).await?;
            info!("{} {} - {}", method, path, response.status().as_u16());
            Ok(response)
        })
    }
}

struct RequestTally(Arc<ServerStats>);

impl Drop for RequestTally {
    fn drop(&mut self) {
        self.0.record_request();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, response::IntoResponse, routing::get, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(stats: Arc<ServerStats>) -> Router {
        let probe = stats.clone();
        Router::new()
            .route(
                "/seen",
                get(move || {
                    let probe = probe.clone();
                    async move { probe.requests_processed().to_string() }
                }),
            )
            .route(
                "/fail",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR.into_response() }),
            )
            .layer(request_counter_layer(stats))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn counts_after_the_handler_runs() {
        let stats = Arc::new(ServerStats::new());
        let app = router(stats.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/seen").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "0");
        assert_eq!(stats.requests_processed(), 1);

        let response = app
            .oneshot(Request::get("/seen").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "1");
    }

    #[tokio::test]
    async fn counts_requests_cancelled_before_a_response() {
        let stats = Arc::new(ServerStats::new());
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    "done"
                }),
            )
            .layer(request_counter_layer(stats.clone()));

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            app.oneshot(Request::get("/slow").body(Body::empty()).unwrap()),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(stats.requests_processed(), 1);
    }

    #[tokio::test]
    async fn counts_failures_and_unknown_routes() {
        let stats = Arc::new(ServerStats::new());
        let app = router(stats.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = app
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert_eq!(stats.requests_processed(), 2);
    }
}
