//! Narrow interface to the WebDAV transport collaborator.
//!
//! The propagation engine depends on verbs, paths, payload bytes and status
//! codes only; everything below that line (connections, TLS, multistatus
//! decoding) belongs to the account layer implementing [`DavTransport`].

pub mod errors;
pub mod probe;
pub mod requests;
pub mod transport;

pub use errors::{DavError, Result};
pub use probe::{
    check_server, RedirectDecision, RedirectPolicy, RedirectRefusal, ServerStatus, MAX_REDIRECTS,
};
pub use requests::{DavRequest, DavVerb, Depth};
pub use transport::{DavResponse, DavTransport};
