//! v3 ("Parker") — signed, IPAM-backed prefix response. See spec.md §4.5/§6.

use std::{
    net::Ipv6Addr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use hyper::{Body, Request, Response, StatusCode};
use ipnet::{Ipv4Net, Ipv6Net};
use wgkex_common::{topics, PublicKey};

use crate::{context::BrokerContext, error::ServerError, selector::select_best_worker};

const MAX_MTU: u32 = 1375;
const DEFAULT_MTU: u32 = 1280;

pub async fn handle(req: Request<Body>, ctx: Arc<BrokerContext>) -> Result<Response<Body>, ServerError> {
    if !ctx.config.parker.enabled {
        return Err(ServerError::ParkerDisabled);
    }
    let ipam = ctx.ipam.clone().ok_or(ServerError::ParkerDisabled)?;
    let signer = ctx.signer.clone().ok_or(ServerError::NoSigningKey)?;

    let query: std::collections::HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let v6mtu: u32 = query
        .get("v6mtu")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MTU);
    let mtu = v6mtu.min(MAX_MTU);

    let pubkey_raw = query.get("pubkey").cloned().unwrap_or_default();
    let pubkey: PublicKey = pubkey_raw.parse().map_err(ServerError::InvalidRequest)?;
    let nonce = query.get("nonce").cloned().unwrap_or_default();

    let v6_len = ctx.config.parker.prefixes.ipv6.length;
    let key = pubkey.clone();
    let assignment = tokio::task::spawn_blocking(move || ipam.get_or_allocate_prefix(&key, false, true, 0, v6_len))
        .await
        .expect("IPAM worker thread panicked")?;

    let parent_v6 = assignment.v6.ok_or(ServerError::NoEndpointData)?;
    let mut subnets = parent_v6.subnets(64).map_err(|_| ServerError::NoEndpointData)?;
    let range6 = subnets.next().ok_or(ServerError::NoEndpointData)?;
    let xlat_range6 = subnets.next().ok_or(ServerError::NoEndpointData)?;

    ctx.mqtt
        .publish(
            topics::PARKER_PEER_INSTALL_TOPIC,
            serde_json::json!({
                "PublicKey": pubkey,
                "Range6": range6.to_string(),
                "Keepalive": serde_json::Value::Null,
            })
            .to_string()
            .into_bytes(),
            false,
        )
        .await?;

    let mut selection = None;
    for domain in ctx.config.validated_domains().map_err(ServerError::InvalidRequest)? {
        if let Some(sel) = select_best_worker(&ctx.registry, &ctx.config, &domain) {
            selection = Some((domain, sel));
            break;
        }
    }
    let (domain, selection) = selection.ok_or(ServerError::NoGatewayOnline)?;
    let endpoint = ctx
        .registry
        .endpoint(&selection.worker, &domain)
        .ok_or(ServerError::NoEndpointData)?;
    ctx.registry.bump_connected_peers(&selection.worker, &domain);

    let range4: Ipv4Net = ctx.config.parker.prefixes.ipv4.clat_subnet;
    let address4 = first_host_v4(range4);
    let address6 = first_host_v6(range6);

    let time = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

    let concentrator = serde_json::json!({
        "address4": serde_json::Value::Null,
        "address6": endpoint.link_address,
        "endpoint": format!("{}:{}", endpoint.external_address, endpoint.port),
        "pubkey": endpoint.public_key,
        "id": selection.worker,
    });

    let body = serde_json::json!({
        "nonce": nonce,
        "time": time,
        "id": pubkey,
        "mtu": mtu,
        "concentrators": [concentrator],
        "selected_concentrators": "1",
        "range6": range6.to_string(),
        "address6": address6.to_string(),
        "xlat_range6": xlat_range6.to_string(),
        "range4": range4.to_string(),
        "address4": address4.to_string(),
        "wg_keepalive": 25,
        "retry": 120,
    });

    let mut signed_data = body.to_string().into_bytes();
    signed_data.push(b'\n');
    let signature = signer.sign(&signed_data);

    let mut response_body = signed_data;
    response_body.extend_from_slice(signature.as_bytes());

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain")
        .body(Body::from(response_body))?)
}

fn first_host_v4(net: Ipv4Net) -> std::net::Ipv4Addr {
    let network = u32::from(net.network());
    std::net::Ipv4Addr::from(network.wrapping_add(1))
}

fn first_host_v6(net: Ipv6Net) -> Ipv6Addr {
    let network = u128::from(net.network());
    Ipv6Addr::from(network | 1)
}

