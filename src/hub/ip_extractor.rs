//! Client IP extraction for upgrade requests
//!
//! The socket address is authoritative unless a trusted proxy mode is
//! configured:
//! - `cloudflare`: `CF-Connecting-IP`
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`, walked right
//!   to left past trusted hops

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ProxyConfig, TrustedProxyMode};

/// Resolve the client IP for a request arriving from `socket_ip`
pub fn extract_client_ip(headers: &HeaderMap, socket_ip: IpAddr, config: &ProxyConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_ip
        }),
        TrustedProxyMode::Standard => {
            let chain = forwarded_chain(headers);
            select_from_chain(&chain, socket_ip, config).unwrap_or(socket_ip)
        }
        TrustedProxyMode::None => socket_ip,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Hops recorded by proxies, leftmost (client side) first.
/// `Forwarded` wins over `X-Forwarded-For` when both are present.
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    let from_forwarded = parse_forwarded(headers);
    if !from_forwarded.is_empty() {
        return from_forwarded;
    }

    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect()
}

/// Collect `for=` parameters from `Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"`
fn parse_forwarded(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("forwarded")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|value| value.split(','))
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("for") {
                return None;
            }
            parse_node(value.trim().trim_matches('"'))
        })
        .collect()
}

/// Parse a node identifier: `1.2.3.4`, `1.2.3.4:80`, `[::1]`, `[::1]:80`
fn parse_node(node: &str) -> Option<IpAddr> {
    if let Some(rest) = node.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }
    node.rsplit_once(':')
        .and_then(|(host, _port)| host.parse::<IpAddr>().ok())
}

/// Pick the client from a proxy chain. The socket peer is the last hop and
/// must itself be trusted before any header is believed.
fn select_from_chain(chain: &[IpAddr], socket_ip: IpAddr, config: &ProxyConfig) -> Option<IpAddr> {
    if chain.is_empty() {
        return None;
    }

    if let Some(hops) = config.num_trusted_proxies {
        // The socket peer counts as the first trusted hop
        let skip = hops.saturating_sub(1);
        return if chain.len() > skip {
            Some(chain[chain.len() - skip - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        let trusted = |ip: &IpAddr| config.trusted_proxies.iter().any(|net| net.contains(ip));
        if !trusted(&socket_ip) {
            return None;
        }
        return chain
            .iter()
            .rev()
            .find(|ip| !trusted(ip))
            .or_else(|| chain.first())
            .copied();
    }

    // No trust configuration: the hop closest to us
    chain.last().copied()
}
