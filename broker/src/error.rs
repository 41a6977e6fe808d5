use std::convert::TryFrom;

use hyper::{Body, Response, StatusCode};
use thiserror::Error;

/// Errors surfaced by the broker's HTTP handlers. Converted to a generic
/// JSON error body at the HTTP boundary; never leaks internal detail.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid request")]
    InvalidRequest(#[from] wgkex_common::Error),

    #[error("no gateway online for this domain")]
    NoGatewayOnline,

    #[error("selected worker has no endpoint data")]
    NoEndpointData,

    #[error("key is blacklisted")]
    Blacklisted,

    #[error("internal IPAM error")]
    Ipam(#[from] crate::ipam::IpamError),

    #[error("internal MQTT error")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("parker support is not enabled")]
    ParkerDisabled,

    #[error("signing key is not configured")]
    NoSigningKey,

    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error")]
    Http(#[from] hyper::http::Error),

    #[error("failed to read request body")]
    BodyRead(#[from] hyper::Error),

    #[error("not found")]
    NotFound,
}

impl From<&ServerError> for StatusCode {
    fn from(error: &ServerError) -> StatusCode {
        use ServerError::*;
        match error {
            InvalidRequest(_) | Json(_) => StatusCode::BAD_REQUEST,
            NoGatewayOnline => StatusCode::BAD_REQUEST,
            Blacklisted => StatusCode::BAD_REQUEST,
            ParkerDisabled => StatusCode::BAD_REQUEST,
            NotFound => StatusCode::NOT_FOUND,
            NoEndpointData | Ipam(_) | Mqtt(_) | NoSigningKey | Http(_) | BodyRead(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

/// `{"error":{"message": "..."}}`, the generic error body every endpoint
/// returns on failure. Internal errors get a fixed, non-sensitive message;
/// validation errors may describe what was wrong with the request.
impl ServerError {
    fn public_message(&self) -> String {
        match self {
            ServerError::InvalidRequest(e) => e.to_string(),
            ServerError::NoGatewayOnline => "no gateway online for this domain".to_owned(),
            ServerError::Blacklisted => "this key is not permitted".to_owned(),
            ServerError::ParkerDisabled => "this endpoint is not enabled".to_owned(),
            ServerError::NotFound => "not found".to_owned(),
            _ => "An internal error has occurred. Please try again later.".to_owned(),
        }
    }
}

impl TryFrom<ServerError> for Response<Body> {
    type Error = hyper::http::Error;

    fn try_from(e: ServerError) -> Result<Self, Self::Error> {
        log::warn!("request failed: {e}");
        let body = serde_json::json!({ "error": { "message": e.public_message() } });
        Response::builder()
            .status(StatusCode::from(&e))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
    }
}
