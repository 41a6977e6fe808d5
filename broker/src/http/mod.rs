//! The broker's HTTP surface: `GET /`, and the three key-exchange
//! endpoints. See spec.md §4.5/§6.

mod v1;
mod v2;
mod v3;

use std::{convert::TryInto, net::TcpListener, sync::Arc};

use hyper::{http, service::make_service_fn, Body, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::{context::BrokerContext, error::ServerError};

/// Binds and runs the HTTP server until `shutdown` resolves. Mirrors the
/// `make_service_fn`/`hyper_service` shape used by the teacher's own server
/// crate.
pub async fn serve(
    ctx: Arc<BrokerContext>,
    listener: TcpListener,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), hyper::Error> {
    listener.set_nonblocking(true).expect("listener must support non-blocking mode");

    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, http::Error>(hyper::service::service_fn(move |req: Request<Body>| {
                hyper_service(req, ctx.clone())
            }))
        }
    });

    hyper::Server::from_tcp(listener)?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn hyper_service(req: Request<Body>, ctx: Arc<BrokerContext>) -> Result<Response<Body>, http::Error> {
    log::debug!("{} {}", req.method(), req.uri());
    routes(req, ctx).await.or_else(TryInto::try_into)
}

async fn routes(req: Request<Body>, ctx: Arc<BrokerContext>) -> Result<Response<Body>, ServerError> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/") => index(),
        (&Method::POST, "/api/v1/wg/key/exchange") => v1::handle(req, ctx).await,
        (&Method::POST, "/api/v2/wg/key/exchange") => v2::handle(req, ctx).await,
        (&Method::GET, "/api/v3/wg/key/exchange") => v3::handle(req, ctx).await,
        _ => Err(ServerError::NotFound),
    }
}

fn index() -> Result<Response<Body>, ServerError> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/html")
        .body(Body::from("<html><body>wgkex broker</body></html>"))?)
}

/// Reads and JSON-decodes a request body, mapping failures to
/// [`ServerError::Json`].
async fn read_json_body<T: DeserializeOwned>(req: Request<Body>) -> Result<T, ServerError> {
    let bytes = hyper::body::to_bytes(req.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> Result<Response<Body>, ServerError> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}
