//! v1 — fire-and-forget key exchange. See spec.md §4.5.

use std::sync::Arc;

use hyper::{Body, Request, Response, StatusCode};
use serde::Deserialize;
use wgkex_common::{topics, PublicKey};

use super::{json_response, read_json_body};
use crate::{context::BrokerContext, error::ServerError};

#[derive(Deserialize)]
pub(crate) struct ExchangeRequest {
    pub public_key: String,
    pub domain: String,
}

/// Validates `public_key`/`domain`, checks the deny-list and (if configured)
/// the allow-list, and returns the parsed key/domain pair.
pub(crate) fn validate_and_authorize(
    ctx: &BrokerContext,
    req: &ExchangeRequest,
) -> Result<(PublicKey, wgkex_common::Domain), ServerError> {
    let key: PublicKey = req.public_key.parse().map_err(ServerError::InvalidRequest)?;
    let domain = ctx.config.validate_domain(&req.domain).map_err(ServerError::InvalidRequest)?;

    if ctx.deny_list.is_blacklisted(&key) {
        return Err(ServerError::Blacklisted);
    }
    if !ctx.key_is_permitted(domain.name(), &key) {
        return Err(ServerError::Blacklisted);
    }

    Ok((key, domain))
}

pub async fn handle(req: Request<Body>, ctx: Arc<BrokerContext>) -> Result<Response<Body>, ServerError> {
    let body: ExchangeRequest = read_json_body(req).await?;
    let (key, domain) = validate_and_authorize(&ctx, &body)?;

    ctx.mqtt
        .publish(topics::peer_install_topic(&domain), key.to_string().into_bytes(), false)
        .await?;

    json_response(StatusCode::OK, serde_json::json!({ "Message": "OK" }))
}
