use chrono::Utc;
use std::net::IpAddr;
use tracing::warn;

/// Resolve a stable label for the local host, used in stream names.
///
/// Prefers the first non-loopback IPv4 address across all interfaces.
/// When only loopback or IPv6 addresses exist, the last address seen is
/// returned. Enumeration failure is never fatal: a time-stamped synthetic
/// label keeps repeated fallbacks distinguishable.
pub fn resolve() -> String {
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => pick_address(interfaces.iter().map(|iface| iface.ip()))
            .unwrap_or_else(|| "localhost".to_string()),
        Err(e) => {
            warn!(error = %e, "failed to enumerate network interfaces");
            fallback_label(Utc::now().timestamp_millis())
        }
    }
}

fn pick_address(addresses: impl IntoIterator<Item = IpAddr>) -> Option<String> {
    let mut candidate = None;
    for address in addresses {
        if address.is_ipv4() && !address.is_loopback() {
            return Some(address.to_string());
        }
        candidate = Some(address.to_string());
    }
    candidate
}

fn fallback_label(now_ms: i64) -> String {
    format!("no_addr_{now_ms}")
}
