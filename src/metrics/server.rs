//! Prometheus scrape endpoint
//!
//! Serves `/metrics` in the text exposition format and `/health` for
//! liveness probes. Stops accepting when the gateway scope is shut down.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use super::GatewayMetrics;
use crate::session::CancellationScope;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub struct MetricsServer {
    metrics: Arc<GatewayMetrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<GatewayMetrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Serve scrapes until `scope` is shut down
    pub async fn run(
        self,
        scope: CancellationScope,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Serving metrics at http://{}/metrics", listener.local_addr()?);

        loop {
            tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tokio::spawn(serve_scraper(stream, peer, self.metrics.clone()));
                }
            }
        }

        info!("Metrics endpoint closed");
        Ok(())
    }
}

async fn serve_scraper(stream: TcpStream, peer: SocketAddr, metrics: Arc<GatewayMetrics>) {
    let service = service_fn(move |req: Request<Incoming>| {
        let response = route(req.uri().path(), &metrics);
        async move { Ok::<_, Infallible>(response) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Metrics connection from {} failed: {}", peer, e);
    }
}

fn route(path: &str, metrics: &GatewayMetrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => match metrics.encode_text() {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                response
            }
            Err(e) => {
                error!("Cannot render metrics: {}", e);
                plain(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        },
        "/health" | "/healthz" => plain(StatusCode::OK, "OK"),
        _ => plain(StatusCode::NOT_FOUND, "not found"),
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}
