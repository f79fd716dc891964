use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Prefixes an ICE server URL with a scheme when the registry omitted it.
// Servers with credentials are TURN relays, everything else is STUN.
pub fn add_ice_url_scheme(url: &str, has_credentials: bool) -> String {
    if url.starts_with("turn:") || url.starts_with("turns:") || url.starts_with("stun:") || url.starts_with("stuns:") {
        url.to_string()
    } else {
        let scheme = if has_credentials { "turn:" } else { "stun:" };
        format!("{}{}", scheme, url)
    }
}
