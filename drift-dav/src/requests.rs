//! Request descriptions handed to the transport collaborator.
//!
//! The engine never speaks HTTP itself; it describes what to send (verb,
//! path, depth, body) and consumes status code, location header and body
//! bytes of the reply. Multistatus decoding stays with the transport.

use bytes::Bytes;

/// The verbs the propagation engine needs from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DavVerb {
    Propfind,
    MkCol,
    Get,
    Put,
    Move,
    Delete,
}

impl DavVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            DavVerb::Propfind => "PROPFIND",
            DavVerb::MkCol => "MKCOL",
            DavVerb::Get => "GET",
            DavVerb::Put => "PUT",
            DavVerb::Move => "MOVE",
            DavVerb::Delete => "DELETE",
        }
    }
}

/// PROPFIND scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

impl Depth {
    pub fn header_value(&self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
        }
    }
}

/// One request to the remote DAV endpoint.
#[derive(Debug, Clone)]
pub struct DavRequest {
    pub verb: DavVerb,
    pub path: String,
    pub depth: Option<Depth>,
    pub body: Option<Bytes>,
}

impl DavRequest {
    pub fn new(verb: DavVerb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            depth: None,
            body: None,
        }
    }

    /// Query the etag of `path`.
    ///
    /// The root etag is not reliably updated by all servers when children
    /// change, so the root query descends one level instead.
    pub fn request_etag(path: &str) -> Self {
        let depth = if path.is_empty() || path == "/" {
            Depth::One
        } else {
            Depth::Zero
        };
        Self {
            verb: DavVerb::Propfind,
            path: path.to_string(),
            depth: Some(depth),
            body: Some(Bytes::from_static(
                b"<?xml version=\"1.0\" ?>\n\
                  <d:propfind xmlns:d=\"DAV:\">\n\
                  \x20 <d:prop>\n\
                  \x20   <d:getetag/>\n\
                  \x20 </d:prop>\n\
                  </d:propfind>\n",
            )),
        }
    }

    /// List the collections directly below `path`.
    pub fn list_collections(path: &str) -> Self {
        Self {
            verb: DavVerb::Propfind,
            path: path.to_string(),
            depth: Some(Depth::One),
            body: Some(Bytes::from_static(
                b"<?xml version=\"1.0\" ?>\n\
                  <d:propfind xmlns:d=\"DAV:\">\n\
                  \x20 <d:prop>\n\
                  \x20   <d:resourcetype/>\n\
                  \x20 </d:prop>\n\
                  </d:propfind>\n",
            )),
        }
    }

    /// Fetch the given properties of `path`; an empty list asks for all.
    pub fn propfind(path: &str, properties: &[&str]) -> Self {
        let mut props = String::new();
        if properties.is_empty() {
            props.push_str("    <d:allprop />\n");
        } else {
            for prop in properties {
                props.push_str(&format!("    <d:{} />\n", prop));
            }
        }
        let body = format!(
            "<?xml version=\"1.0\" ?>\n\
             <d:propfind xmlns:d=\"DAV:\">\n\
             \x20 <d:prop>\n\
             {props}\
             \x20 </d:prop>\n\
             </d:propfind>\n"
        );
        Self {
            verb: DavVerb::Propfind,
            path: path.to_string(),
            depth: Some(Depth::Zero),
            body: Some(Bytes::from(body)),
        }
    }

    /// Create the remote collection at `path`.
    pub fn mkcol(path: &str) -> Self {
        Self::new(DavVerb::MkCol, path)
    }
}
