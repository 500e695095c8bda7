//! The transport collaborator interface.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::Result;
use crate::requests::DavRequest;

/// What the engine consumes from a reply: status code, redirect target,
/// body bytes and, on the first probe, the peer certificate chain.
#[derive(Debug, Clone, Default)]
pub struct DavResponse {
    pub status: u16,
    /// Value of the `Location` header, when the server redirected.
    pub location: Option<String>,
    pub body: Bytes,
    /// DER-encoded peer certificates, populated on the first connection.
    pub certificate_chain: Vec<Bytes>,
}

impl DavResponse {
    pub fn is_multistatus(&self) -> bool {
        self.status == 207
    }
}

/// Implemented by the account/network layer. The engine only ever issues
/// requests through this trait and never constructs connections itself.
#[async_trait]
pub trait DavTransport: Send + Sync {
    /// Issue one request against the DAV endpoint.
    async fn request(&self, request: DavRequest) -> Result<DavResponse>;

    /// Fetch the server status document (the `status.php` equivalent).
    async fn probe_status(&self, url: &str) -> Result<DavResponse>;
}
