//! Deriving the live socket URL from the origin the application was served
//! from.

use std::fmt;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::error::EndpointError;

/// Path of the live endpoint on the server.
pub const LIVE_PATH: &str = "/ws/live";

/// Backend port used while the frontend runs from a dev server.
pub const DEFAULT_DEV_PORT: u16 = 5055;

/// The parts of a page origin that matter for the socket URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    pub secure: bool,
    pub host: String,
    pub port: Option<u16>,
}

impl PageOrigin {
    pub fn new(secure: bool, host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            secure,
            host: host.into(),
            port,
        }
    }

    /// Parse an `http://` or `https://` origin. Any path is ignored.
    pub fn parse(origin: &str) -> Result<Self, EndpointError> {
        let uri: Uri = origin
            .trim()
            .parse()
            .map_err(|_| EndpointError::InvalidOrigin(origin.to_string()))?;

        let secure = match uri.scheme_str() {
            Some(s) if s.eq_ignore_ascii_case("https") => true,
            Some(s) if s.eq_ignore_ascii_case("http") => false,
            Some(other) => return Err(EndpointError::UnsupportedScheme(other.to_string())),
            None => return Err(EndpointError::InvalidOrigin(origin.to_string())),
        };
        let host = match uri.host() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(EndpointError::MissingHost(origin.to_string())),
        };

        Ok(Self {
            secure,
            host,
            port: uri.port_u16(),
        })
    }
}

impl fmt::Display for PageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        match self.port {
            Some(port) => write!(f, "{scheme}://{}:{port}", self.host),
            None => write!(f, "{scheme}://{}", self.host),
        }
    }
}

/// Live socket URL for a page served from `origin`.
///
/// The socket is secure exactly when the page is. With `dev_port` set the
/// backend is assumed to be on that port of the same host; otherwise the
/// page's own port (if any) is kept.
pub fn live_endpoint(origin: &PageOrigin, dev_port: Option<u16>) -> String {
    let scheme = if origin.secure { "wss" } else { "ws" };
    match dev_port.or(origin.port) {
        Some(port) => format!("{scheme}://{}:{port}{LIVE_PATH}", origin.host),
        None => format!("{scheme}://{}{LIVE_PATH}", origin.host),
    }
}
