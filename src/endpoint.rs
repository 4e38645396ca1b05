//! Endpoint derivation from the operator's origin.
//!
//! Nothing here is a fixed address: the session socket and the binding API
//! both live on the origin's host at the control port, so whatever host the
//! operator reached the front end through is the one the agent is reached on.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::session::Session;

/// Default control-plane port
pub const DEFAULT_CONTROL_PORT: u16 = 8080;

const SESSION_PATH: &str = "/ws";
const BIND_PATH: &str = "/api/device/bind";

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid origin '{input}': {source}")]
    InvalidOrigin {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("origin scheme must be http or https, got '{0}'")]
    UnsupportedScheme(String),
    #[error("origin '{0}' has no host")]
    MissingHost(String),
    #[error("failed to build endpoint: {0}")]
    Build(#[from] url::ParseError),
}

/// The network location the operator is using, e.g. `http://192.168.1.5:3000`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    url: Url,
}

impl Origin {
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(input).map_err(|source| EndpointError::InvalidOrigin {
            input: input.to_string(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(EndpointError::MissingHost(input.to_string()));
        }
        Ok(Self { url })
    }

    /// Whether the origin was reached over TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    fn endpoint(&self, plain: &str, secure: &str, port: u16, path: &str) -> Result<Url, EndpointError> {
        let scheme = if self.is_secure() { secure } else { plain };
        Ok(Url::parse(&format!("{}://{}:{}{}", scheme, self.host(), port, path))?)
    }

    /// WebSocket address for a session
    pub fn session_endpoint(&self, port: u16, session: &Session) -> Result<Url, EndpointError> {
        let mut url = self.endpoint("ws", "wss", port, SESSION_PATH)?;
        url.query_pairs_mut()
            .append_pair("device_id", &session.device_id)
            .append_pair("token", &session.token);
        Ok(url)
    }

    /// HTTP address of the binding exchange
    pub fn bind_endpoint(&self, port: u16) -> Result<Url, EndpointError> {
        self.endpoint("http", "https", port, BIND_PATH)
    }
}

impl FromStr for Origin {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url.as_str().trim_end_matches('/'))
    }
}

/// Endpoint with the token query value masked, for display and logs
pub fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_origin_gives_ws_endpoint_on_its_host() {
        let origin = Origin::parse("http://192.168.1.5:3000/some/page").unwrap();
        let url = origin.session_endpoint(8080, &Session::new("dev-42")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://192.168.1.5:8080/ws?device_id=dev-42&token=viewer"
        );
    }

    #[test]
    fn secure_origin_upgrades_to_wss() {
        let origin = Origin::parse("https://term.example.com").unwrap();
        let url = origin.session_endpoint(8080, &Session::new("d")).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("term.example.com"));
        assert_eq!(url.port(), Some(8080));
    }

    #[test]
    fn query_values_are_encoded() {
        let origin = Origin::parse("http://localhost").unwrap();
        let session = Session::with_token("a b", Some("x&y".to_string()));
        let url = origin.session_endpoint(9000, &session).unwrap();
        assert_eq!(url.query(), Some("device_id=a+b&token=x%26y"));
    }

    #[test]
    fn bind_endpoint_follows_scheme() {
        let origin = Origin::parse("http://localhost:3000").unwrap();
        assert_eq!(
            origin.bind_endpoint(8080).unwrap().as_str(),
            "http://localhost:8080/api/device/bind"
        );
        let origin = Origin::parse("https://localhost").unwrap();
        assert_eq!(
            origin.bind_endpoint(8443).unwrap().as_str(),
            "https://localhost:8443/api/device/bind"
        );
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let origin = Origin::parse("http://[::1]:3000").unwrap();
        let url = origin.session_endpoint(8080, &Session::new("d")).unwrap();
        assert!(url.as_str().starts_with("ws://[::1]:8080/ws?"));
    }

    #[test]
    fn rejects_bad_origins() {
        assert!(matches!(
            Origin::parse("not a url"),
            Err(EndpointError::InvalidOrigin { .. })
        ));
        assert!(matches!(
            Origin::parse("ftp://host"),
            Err(EndpointError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn redaction_masks_token() {
        let origin = Origin::parse("http://localhost").unwrap();
        let session = Session::with_token("dev-1", Some("secret".to_string()));
        let url = origin.session_endpoint(8080, &session).unwrap();
        let shown = redacted(&url);
        assert!(shown.contains("device_id=dev-1"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn display_trims_trailing_slash() {
        let origin = Origin::parse("http://localhost:3000").unwrap();
        assert_eq!(origin.to_string(), "http://localhost:3000");
    }
}
