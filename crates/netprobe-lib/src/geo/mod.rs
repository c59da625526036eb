//! Geolocation enrichment for traceroute hops
//!
//! This module provides:
//! - A resolver that looks up public addresses over HTTP
//! - A cache-aside layer with per-address TTL in front of it
//! - The private address predicate both of them share

mod cache;
mod resolver;

pub use cache::{CacheStore, LocationCache, MemoryCacheStore, DEFAULT_CACHE_TTL};
pub use resolver::{GeoResolverConfig, HttpGeoResolver, DEFAULT_GEO_API_URL};

use crate::models::Location;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Trait for IP geolocation lookups
///
/// Lookups are best effort: every failure is reported as `None`.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, ip: &str) -> Option<Location>;
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;

    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_v4(&mapped);
    }

    ip.is_loopback() || ip.is_unspecified() || unique_local || link_local
}

/// Whether `ip` is a loopback, private, or link-local address
///
/// Strings that are not IP addresses are not private.
pub fn is_private_ip(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(&v4),
        Ok(IpAddr::V6(v6)) => is_private_v6(&v6),
        Err(_) => false,
    }
}

/// Whether `ip` should be sent to the geolocation service at all
pub fn is_lookup_candidate(ip: &str) -> bool {
    ip.trim().parse::<IpAddr>().is_ok() && !is_private_ip(ip)
}
