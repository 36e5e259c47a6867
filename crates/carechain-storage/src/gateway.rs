//! Public gateway URLs for stored blobs

use carechain_core::ContentAddress;

/// Used when no gateway is configured.
pub const DEFAULT_GATEWAY: &str = "https://ipfs.io";

/// `{gateway}/ipfs/{address}`. A gateway without a scheme gets `https://`.
pub fn gateway_url(gateway: &str, address: &ContentAddress) -> String {
    let gateway = gateway.trim().trim_end_matches('/');
    let base = if gateway.is_empty() {
        DEFAULT_GATEWAY.to_string()
    } else if gateway.starts_with("https://") || gateway.starts_with("http://") {
        gateway.to_string()
    } else {
        format!("https://{gateway}")
    };
    format!("{base}/ipfs/{address}")
}
