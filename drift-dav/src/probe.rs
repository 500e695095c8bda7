//! Server probe decoding and the redirect policy applied while locating
//! the status document.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{DavError, Result};

/// Maximum redirect hops followed during the server probe.
pub const MAX_REDIRECTS: u32 = 10;

/// Decoded status document of the remote instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub installed: bool,
    pub version: String,
    pub versionstring: String,
}

impl ServerStatus {
    /// Decode the probe body. Bodies missing any of the required keys are
    /// rejected as not coming from a compatible server.
    pub fn parse(body: &[u8]) -> Result<ServerStatus> {
        let status: ServerStatus = serde_json::from_slice(body)?;
        debug!(version = %status.versionstring, installed = status.installed, "server probe decoded");
        Ok(status)
    }
}

/// Why a redirect was not followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectRefusal {
    /// Redirecting from https to plain http would downgrade the channel.
    Downgrade,
    /// The target equals the source; following would loop forever.
    SelfReference,
    /// The hop budget is spent.
    TooManyHops,
}

impl RedirectRefusal {
    fn describe(&self) -> &'static str {
        match self {
            RedirectRefusal::Downgrade => "https to http downgrade",
            RedirectRefusal::SelfReference => "redirect loop",
            RedirectRefusal::TooManyHops => "too many redirects",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    Follow,
    Refuse(RedirectRefusal),
}

/// Hop-counting redirect guard. One instance lives for the duration of a
/// probe; the only state carried across hops is the counter and the
/// original scheme.
#[derive(Debug)]
pub struct RedirectPolicy {
    max_redirects: u32,
    hops: u32,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::new(MAX_REDIRECTS)
    }
}

fn scheme_of(url: &str) -> Option<&str> {
    url.split_once("://").map(|(scheme, _)| scheme)
}

impl RedirectPolicy {
    pub fn new(max_redirects: u32) -> Self {
        Self {
            max_redirects,
            hops: 0,
        }
    }

    /// Decide whether the redirect from `from` to `to` may be followed,
    /// counting the hop if so.
    pub fn check(&mut self, from: &str, to: &str) -> RedirectDecision {
        self.hops += 1;
        let decision = if scheme_of(from) == Some("https") && scheme_of(to) == Some("http") {
            RedirectDecision::Refuse(RedirectRefusal::Downgrade)
        } else if from == to {
            RedirectDecision::Refuse(RedirectRefusal::SelfReference)
        } else if self.hops >= self.max_redirects {
            RedirectDecision::Refuse(RedirectRefusal::TooManyHops)
        } else {
            RedirectDecision::Follow
        };
        if let RedirectDecision::Refuse(refusal) = &decision {
            warn!(from, to, reason = refusal.describe(), "refusing redirect");
        }
        decision
    }
}

impl From<RedirectRefusal> for DavError {
    fn from(refusal: RedirectRefusal) -> DavError {
        DavError::RedirectRefused(refusal.describe().to_string())
    }
}

/// Locate and decode the server status document, following redirects
/// within the policy. The certificate chain of the first reply is the one
/// reported back for pinning.
pub async fn check_server(
    transport: &dyn crate::transport::DavTransport,
    url: &str,
) -> Result<ServerStatus> {
    let mut policy = RedirectPolicy::default();
    let mut current = url.to_string();
    loop {
        let response = transport.probe_status(&current).await?;
        if let Some(location) = response.location {
            match policy.check(&current, &location) {
                RedirectDecision::Follow => {
                    debug!(from = %current, to = %location, "following server redirect");
                    current = location;
                    continue;
                }
                RedirectDecision::Refuse(refusal) => return Err(refusal.into()),
            }
        }
        if response.status != 200 {
            return Err(DavError::UnexpectedStatus(response.status));
        }
        return ServerStatus::parse(&response.body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_complete_status_document() {
        let body = br#"{"installed": true, "version": "10.0.4.3", "versionstring": "10.0.4"}"#;
        let status = ServerStatus::parse(body).unwrap();
        assert!(status.installed);
        assert_eq!(status.versionstring, "10.0.4");
    }

    #[test]
    fn rejects_incomplete_or_invalid_documents() {
        assert!(ServerStatus::parse(b"{\"installed\": true}").is_err());
        assert!(ServerStatus::parse(b"not json").is_err());
    }

    #[test]
    fn refuses_downgrade_redirects() {
        let mut policy = RedirectPolicy::default();
        assert_eq!(
            policy.check("https://cloud.example/status.php", "http://cloud.example/status.php"),
            RedirectDecision::Refuse(RedirectRefusal::Downgrade)
        );
    }

    #[test]
    fn refuses_loops_and_exhausted_budgets() {
        let mut policy = RedirectPolicy::new(3);
        assert_eq!(
            policy.check("https://a.example/x", "https://a.example/x"),
            RedirectDecision::Refuse(RedirectRefusal::SelfReference)
        );
        assert_eq!(
            policy.check("https://a.example/1", "https://a.example/2"),
            RedirectDecision::Follow
        );
        assert_eq!(
            policy.check("https://a.example/2", "https://a.example/3"),
            RedirectDecision::Refuse(RedirectRefusal::TooManyHops)
        );
    }

    #[test]
    fn upgrade_and_same_scheme_redirects_are_followed() {
        let mut policy = RedirectPolicy::default();
        assert_eq!(
            policy.check("http://a.example/x", "https://a.example/y"),
            RedirectDecision::Follow
        );
    }
}
