//! v2 — endpoint-returning key exchange. See spec.md §4.5.

use std::sync::Arc;

use hyper::{Body, Request, Response, StatusCode};
use wgkex_common::topics;

use super::{json_response, read_json_body, v1::{validate_and_authorize, ExchangeRequest}};
use crate::{context::BrokerContext, error::ServerError, selector::select_best_worker};

pub async fn handle(req: Request<Body>, ctx: Arc<BrokerContext>) -> Result<Response<Body>, ServerError> {
    let body: ExchangeRequest = read_json_body(req).await?;
    let (key, domain) = validate_and_authorize(&ctx, &body)?;

    ctx.mqtt
        .publish(topics::peer_install_topic(&domain), key.to_string().into_bytes(), false)
        .await?;

    let selection = select_best_worker(&ctx.registry, &ctx.config, &domain).ok_or(ServerError::NoGatewayOnline)?;
    let endpoint = ctx
        .registry
        .endpoint(&selection.worker, &domain)
        .ok_or(ServerError::NoEndpointData)?;
    ctx.registry.bump_connected_peers(&selection.worker, &domain);

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "Endpoint": {
                "Address": endpoint.external_address,
                "Port": endpoint.port,
                "AllowedIPs": [endpoint.link_address],
                "PublicKey": endpoint.public_key,
            }
        }),
    )
}
