//! Attachment uploads: multipart POST, then an announcement on the socket.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::TestServer;
use loadchat_client::{Attachment, ChannelConfig, ChannelError, ChannelIdentity, RealtimeChannel};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bill_of_lading() -> Attachment {
    Attachment::new("bol.pdf", b"%PDF-1.4 signed".to_vec()).with_mime_type("application/pdf")
}

async fn open_channel(server: &mut TestServer, api: &MockServer) -> (RealtimeChannel, common::ServerConn) {
    let config = ChannelConfig::new(server.ws_base(), api.uri()).with_token("dispatch-token");
    let channel = RealtimeChannel::new(config);
    channel.connect(ChannelIdentity::new(3, 42)).await.unwrap();
    let conn = server.next_conn().await;
    (channel, conn)
}

#[tokio::test]
async fn stored_attachment_is_announced_on_the_socket() {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/"))
        .and(header("authorization", "Bearer dispatch-token"))
        .and(body_string_contains("name=\"load_id\""))
        .and(body_string_contains("filename=\"bol.pdf\""))
        .and(body_string_contains("signed at dock 4"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 42,
            "file_url": "https://files.example.test/bol.pdf"
        })))
        .expect(1)
        .mount(&api)
        .await;

    let mut server = TestServer::start().await;
    let (channel, mut conn) = open_channel(&mut server, &api).await;

    let body = channel
        .send_file(bill_of_lading(), "signed at dock 4", 42, 3)
        .await
        .unwrap();
    assert_eq!(body["id"], 42);
    assert_eq!(body["file_url"], "https://files.example.test/bol.pdf");

    assert_eq!(
        conn.next_json().await,
        json!({
            "type": "file_message_sent",
            "payload": {"messageId": 42, "conversationId": 42, "userId": 3}
        })
    );
    assert!(conn.next_frame_within(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn response_without_id_is_not_announced() {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"detail": "queued"})))
        .expect(1)
        .mount(&api)
        .await;

    let mut server = TestServer::start().await;
    let (channel, mut conn) = open_channel(&mut server, &api).await;

    let err = channel
        .send_file(bill_of_lading(), "signed", 42, 3)
        .await
        .unwrap_err();
    assert_matches!(err, ChannelError::UploadFailed(_));

    // The first frame the server sees is the marker, not an announcement.
    channel.send_message("marker").unwrap();
    assert_eq!(conn.next_json().await, json!({"message": "marker"}));
}

#[tokio::test]
async fn server_error_fails_the_upload() {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("storage offline"))
        .expect(1)
        .mount(&api)
        .await;

    let mut server = TestServer::start().await;
    let (channel, mut conn) = open_channel(&mut server, &api).await;

    let err = channel
        .send_file(bill_of_lading(), "signed", 42, 3)
        .await
        .unwrap_err();
    assert_matches!(err, ChannelError::UploadFailed(ref reason) if reason.contains("500"));
    assert!(conn.next_frame_within(Duration::from_millis(200)).await.is_none());
    assert!(channel.is_open());
}

#[tokio::test]
async fn upload_requires_an_open_channel() {
    let api = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(0)
        .mount(&api)
        .await;

    let channel = RealtimeChannel::new(ChannelConfig::new("ws://127.0.0.1:9", api.uri()));
    let err = channel
        .send_file(bill_of_lading(), "signed", 42, 3)
        .await
        .unwrap_err();
    assert_matches!(err, ChannelError::ChannelNotOpen);
}
