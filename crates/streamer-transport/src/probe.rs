//! Reachability checks against the publish host.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};
use url::Url;

use crate::error::TransportError;
use crate::TransportResult;

/// Default RTMP port.
pub const RTMP_PORT: u16 = 1935;

/// Default RTMPS port.
pub const RTMPS_PORT: u16 = 443;

/// TCP connect probe for the publish endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ReachabilityProbe {
    /// Create a probe for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(3),
        }
    }

    /// Derive the probe target from an `rtmp://` or `rtmps://` publish URL.
    pub fn from_publish_url(publish_url: &str) -> TransportResult<Self> {
        let parsed =
            Url::parse(publish_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let default_port = match parsed.scheme() {
            "rtmp" => RTMP_PORT,
            "rtmps" => RTMPS_PORT,
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "Unsupported scheme: {other}"
                )))
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?;

        Ok(Self::new(host, parsed.port().unwrap_or(default_port)))
    }

    /// Override the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe target host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Probe target port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns true if a TCP connection to the target succeeds.
    pub fn check(&self) -> bool {
        let addrs = match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(host = %self.host, "Resolve failed: {}", e);
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => trace!(%addr, "Connect failed: {}", e),
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_probe_from_rtmp_url() {
        let probe =
            ReachabilityProbe::from_publish_url("rtmp://a.rtmp.youtube.com/live2/abcd").unwrap();
        assert_eq!(probe.host(), "a.rtmp.youtube.com");
        assert_eq!(probe.port(), RTMP_PORT);
    }

    #[test]
    fn test_probe_from_url_with_port() {
        let probe = ReachabilityProbe::from_publish_url("rtmps://live.example.com:8443/app/key")
            .unwrap();
        assert_eq!(probe.port(), 8443);
    }

    #[test]
    fn test_probe_rejects_http() {
        assert!(ReachabilityProbe::from_publish_url("http://example.com/").is_err());
        assert!(ReachabilityProbe::from_publish_url("not a url").is_err());
    }

    #[test]
    fn test_probe_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = ReachabilityProbe::new("127.0.0.1", port);
        assert!(probe.check());

        drop(listener);
        let probe = ReachabilityProbe::new("127.0.0.1", port)
            .with_timeout(Duration::from_millis(200));
        assert!(!probe.check());
    }
}
