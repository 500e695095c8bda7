//! Server probe flow against a mock transport.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use drift_dav::{check_server, DavError, DavRequest, DavResponse, DavTransport};

/// Canned responses per URL.
#[derive(Default)]
struct MockTransport {
    responses: Mutex<HashMap<String, DavResponse>>,
    probes: Mutex<Vec<String>>,
}

impl MockTransport {
    fn respond(&self, url: &str, response: DavResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    fn probed(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DavTransport for MockTransport {
    async fn request(&self, request: DavRequest) -> drift_dav::Result<DavResponse> {
        Err(DavError::Transport(format!(
            "unexpected {} {}",
            request.verb.as_str(),
            request.path
        )))
    }

    async fn probe_status(&self, url: &str) -> drift_dav::Result<DavResponse> {
        self.probes.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DavError::Transport(format!("no route to {url}")))
    }
}

fn status_body() -> Bytes {
    Bytes::from_static(
        br#"{"installed": true, "version": "10.0.4.3", "versionstring": "10.0.4"}"#,
    )
}

#[tokio::test]
async fn probe_decodes_the_status_document() {
    let transport = MockTransport::default();
    transport.respond(
        "https://cloud.example/status.php",
        DavResponse {
            status: 200,
            body: status_body(),
            ..Default::default()
        },
    );

    let status = check_server(&transport, "https://cloud.example/status.php")
        .await
        .unwrap();
    assert!(status.installed);
    assert_eq!(status.version, "10.0.4.3");
}

#[tokio::test]
async fn probe_follows_redirects_within_policy() {
    let transport = MockTransport::default();
    transport.respond(
        "https://cloud.example/status.php",
        DavResponse {
            status: 301,
            location: Some("https://cloud.example/files/status.php".to_string()),
            ..Default::default()
        },
    );
    transport.respond(
        "https://cloud.example/files/status.php",
        DavResponse {
            status: 200,
            body: status_body(),
            ..Default::default()
        },
    );

    let status = check_server(&transport, "https://cloud.example/status.php")
        .await
        .unwrap();
    assert_eq!(status.versionstring, "10.0.4");
    assert_eq!(transport.probed().len(), 2);
}

#[tokio::test]
async fn probe_refuses_downgrade_redirects() {
    let transport = MockTransport::default();
    transport.respond(
        "https://cloud.example/status.php",
        DavResponse {
            status: 302,
            location: Some("http://cloud.example/status.php".to_string()),
            ..Default::default()
        },
    );

    let error = check_server(&transport, "https://cloud.example/status.php")
        .await
        .unwrap_err();
    assert!(matches!(error, DavError::RedirectRefused(_)));
    assert_eq!(transport.probed().len(), 1);
}

#[tokio::test]
async fn probe_breaks_redirect_loops() {
    let transport = MockTransport::default();
    transport.respond(
        "https://cloud.example/status.php",
        DavResponse {
            status: 302,
            location: Some("https://cloud.example/status.php".to_string()),
            ..Default::default()
        },
    );

    let error = check_server(&transport, "https://cloud.example/status.php")
        .await
        .unwrap_err();
    assert!(matches!(error, DavError::RedirectRefused(_)));
}

#[tokio::test]
async fn probe_rejects_non_ok_answers() {
    let transport = MockTransport::default();
    transport.respond(
        "https://cloud.example/status.php",
        DavResponse {
            status: 404,
            ..Default::default()
        },
    );

    let error = check_server(&transport, "https://cloud.example/status.php")
        .await
        .unwrap_err();
    assert!(matches!(error, DavError::UnexpectedStatus(404)));
}
