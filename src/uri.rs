use std::net::IpAddr;

use url::Url;

use crate::{Result, StreamError, DEFAULT_PORT, URI_SCHEME};

/// Parsed form of a `udp://@host:port` connection string.
///
/// The scheme is mandatory and must be `udp` (matched case-insensitively).
/// The host is optional; when it is absent or not a literal IP address the
/// stream binds to the wildcard address. The port defaults to
/// [`DEFAULT_PORT`] when absent or unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamUri {
    /// Multicast group or interface address, when the host part is a
    /// literal IP.
    pub addr: Option<IpAddr>,
    /// Destination port.
    pub port: u16,
}

impl StreamUri {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        // A port that fails to parse counts as absent: strip it and retry,
        // letting the default apply
        let url = match Url::parse(s) {
            Ok(url) => Ok(url),
            Err(url::ParseError::InvalidPort) => {
                let without_port =
                    s.rsplit_once(':').map(|(head, _)| head).unwrap_or(s);
                Url::parse(without_port)
            }
            Err(e) => Err(e),
        }
        .map_err(|e| StreamError::Uri(format!("{}: {}", s, e)))?;

        // Url lowercases the scheme, which gives us the case-insensitive
        // comparison for free
        if url.scheme() != URI_SCHEME {
            return Err(StreamError::Uri(format!(
                "unsupported scheme '{}', expected '{}'",
                url.scheme(),
                URI_SCHEME
            )));
        }

        let addr = match url.host() {
            Some(url::Host::Ipv4(ip)) => Some(IpAddr::V4(ip)),
            Some(url::Host::Ipv6(ip)) => Some(IpAddr::V6(ip)),
            // Non-special schemes keep the host opaque, so a dotted quad
            // still arrives here as a domain string
            Some(url::Host::Domain(name)) => name.parse().ok(),
            None => None,
        };

        Ok(StreamUri {
            addr,
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }
}
