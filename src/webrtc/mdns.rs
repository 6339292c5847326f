use webrtc::ice::mdns::MulticastDnsMode;

/// Environment variable selecting the ICE mDNS mode
pub const MDNS_MODE_ENV: &str = "RTC_SESSION_MDNS_MODE";

pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode_from_env() -> Option<MulticastDnsMode> {
    let raw = std::env::var(MDNS_MODE_ENV).ok()?;
    parse_mdns_mode(&raw)
}

pub fn mdns_mode() -> MulticastDnsMode {
    // QueryOnly: resolve .local candidates from the peer, gather no .local host candidates
    mdns_mode_from_env().unwrap_or(MulticastDnsMode::QueryOnly)
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn default_mdns_host_name(connection_id: &str) -> String {
    format!("{connection_id}.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mdns_mode() {
        assert_eq!(parse_mdns_mode("off"), Some(MulticastDnsMode::Disabled));
        assert_eq!(parse_mdns_mode(" Query-Only "), Some(MulticastDnsMode::QueryOnly));
        assert_eq!(parse_mdns_mode("gather"), Some(MulticastDnsMode::QueryAndGather));
        assert_eq!(parse_mdns_mode(""), None);
        assert_eq!(parse_mdns_mode("sometimes"), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(mdns_mode_label(MulticastDnsMode::QueryOnly), "query_only");
        assert_eq!(default_mdns_host_name("abc"), "abc.local");
    }
}
