//! Autoconfig protocol, carried over the ICN layer itself under the
//! reserved `/autoconfig` name hierarchy.
//!
//! The server side runs on a forwarder and answers discovery, service
//! listing and service registration Interests; the client side runs on a
//! repository, solicits forwarders over broadcast and keeps its prefix
//! registration leased.

pub mod client;
pub mod server;

pub use client::AutoconfigClientLayer;
pub use server::AutoconfigServerLayer;

use rust_icnd_common::name::Name;

/// Whether `name` lies under the reserved `/autoconfig` hierarchy.
pub fn is_autoconfig_name(name: &Name) -> bool {
    name.get(0).map_or(false, |c| c.as_bytes() == b"autoconfig")
}

/// `/autoconfig`: forwarder self-description.
pub fn autoconfig_name() -> Name {
    Name::from_string("/autoconfig")
}

/// `/autoconfig/forwarders`: forwarder advertisement solicited by repos.
pub fn forwarders_name() -> Name {
    Name::from_string("/autoconfig/forwarders")
}

/// `/autoconfig/services`: known-service listing.
pub fn service_list_prefix() -> Name {
    Name::from_string("/autoconfig/services")
}

/// `/autoconfig/service`: service registration.
pub fn service_registration_prefix() -> Name {
    Name::from_string("/autoconfig/service")
}

/// Strip an optional `udp4://` scheme and parse `host:port`.
pub(crate) fn parse_remote(component: &[u8]) -> Option<std::net::SocketAddr> {
    let text = std::str::from_utf8(component).ok()?;
    let text = text.strip_prefix("udp4://").unwrap_or(text);
    text.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autoconfig_names_are_recognised() {
        assert!(is_autoconfig_name(&Name::from_string("/autoconfig")));
        assert!(is_autoconfig_name(&Name::from_string(
            "/autoconfig/service/x/y"
        )));
        assert!(!is_autoconfig_name(&Name::from_string("/foo/bar")));
        assert!(!is_autoconfig_name(&Name::new()));
    }

    #[test]
    fn remote_parsing_accepts_both_forms() {
        assert_eq!(
            parse_remote(b"127.0.0.1:9000"),
            Some("127.0.0.1:9000".parse().unwrap())
        );
        assert_eq!(
            parse_remote(b"udp4://127.0.1.1:1337"),
            Some("127.0.1.1:1337".parse().unwrap())
        );
        assert_eq!(parse_remote(b"not an address"), None);
        assert_eq!(parse_remote(&[0xff, 0xfe]), None);
    }
}
