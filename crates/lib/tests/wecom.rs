//! Integration tests: WeCom robot payloads and error mapping against a fake webhook.

mod common;

use common::FakeServer;
use relay::channels::{MediaType, OutboundChannel, OutboundMessage, SendError, WeComRobot};
use serde_json::json;

const SEND: &str = "/cgi-bin/webhook/send";
const UPLOAD_MEDIA: &str = "/cgi-bin/webhook/upload_media";

async fn robot() -> (FakeServer, WeComRobot) {
    let server = FakeServer::start().await;
    let robot = WeComRobot::new(&server.url("/cgi-bin/webhook/send?key=test-key")).unwrap();
    (server, robot)
}

#[tokio::test]
async fn text_and_markdown_payloads() {
    let (server, robot) = robot().await;
    server.respond_json("POST", SEND, json!({"errcode": 0, "errmsg": "ok"}));

    robot.send_text("hello").await.unwrap();
    robot
        .send(&OutboundMessage::Markdown("**bold**".to_string()))
        .await
        .unwrap();

    let calls = server.requests_to(SEND);
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].query, "key=test-key");
    assert_eq!(
        calls[0].json(),
        json!({"msgtype": "text", "text": {"content": "hello"}})
    );
    assert_eq!(
        calls[1].json(),
        json!({"msgtype": "markdown", "markdown": {"content": "**bold**"}})
    );
}

#[tokio::test]
async fn image_is_uploaded_then_sent_by_media_id() {
    let (server, robot) = robot().await;
    server.respond_json(
        "POST",
        UPLOAD_MEDIA,
        json!({"errcode": 0, "errmsg": "ok", "type": "image", "media_id": "media-1", "created_at": "1380000000"}),
    );
    server.respond_json("POST", SEND, json!({"errcode": 0, "errmsg": "ok"}));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chart.png");
    std::fs::write(&path, b"PNG-CONTENT").unwrap();

    robot.send(&OutboundMessage::Image(path.clone())).await.unwrap();

    let all = server.requests();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].path, UPLOAD_MEDIA);
    assert_eq!(all[0].query, "key=test-key&type=image");
    let form = all[0].text();
    assert!(form.contains(r#"name="media"; filename="chart.png""#));
    assert!(form
        .to_ascii_lowercase()
        .contains("content-type: application/octet-stream"));
    assert!(form.contains("PNG-CONTENT"));
    assert_eq!(all[1].path, SEND);
    assert_eq!(
        all[1].json(),
        json!({"msgtype": "image", "image": {"media_id": "media-1"}})
    );
}

#[tokio::test]
async fn file_upload_uses_file_type() {
    let (server, robot) = robot().await;
    server.respond_json("POST", UPLOAD_MEDIA, json!({"errcode": 0, "media_id": "media-2"}));
    server.respond_json("POST", SEND, json!({"errcode": 0}));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.pdf");
    std::fs::write(&path, b"%PDF").unwrap();

    robot.send_file(&path).await.unwrap();

    assert_eq!(server.requests_to(UPLOAD_MEDIA)[0].query, "key=test-key&type=file");
    assert_eq!(
        server.requests_to(SEND)[0].json(),
        json!({"msgtype": "file", "file": {"media_id": "media-2"}})
    );
}

#[tokio::test]
async fn rate_limit_is_distinguished() {
    let (server, robot) = robot().await;
    server.respond_json(
        "POST",
        SEND,
        json!({"errcode": 45009, "errmsg": "api freq out of limit"}),
    );
    let err = robot.send_text("hello").await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(matches!(err, SendError::RateLimited { code: 45009, .. }));

    server.respond_json("POST", SEND, json!({"errcode": 93000, "errmsg": "invalid webhook url"}));
    let err = robot.send_text("hello").await.unwrap_err();
    assert!(!err.is_rate_limited());
    assert!(matches!(err, SendError::Api { code: 93000, .. }));
}

#[tokio::test]
async fn http_errors_and_missing_media_id() {
    let (server, robot) = robot().await;
    server.respond("POST", SEND, 502, "bad gateway");
    let err = robot.send_markdown("x").await.unwrap_err();
    assert!(matches!(err, SendError::Status { status: 502, ref body } if body == "bad gateway"));

    server.respond("POST", SEND, 200, "not json");
    assert!(matches!(
        robot.send_text("x").await.unwrap_err(),
        SendError::Decode { .. }
    ));

    server.respond_json("POST", UPLOAD_MEDIA, json!({"errcode": 0, "errmsg": "ok"}));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.png");
    std::fs::write(&path, b"x").unwrap();
    let err = robot.upload_media(&path, MediaType::Image).await.unwrap_err();
    assert!(matches!(err, SendError::Api { .. }));
    let missing = robot
        .upload_media(&dir.path().join("nope.png"), MediaType::Image)
        .await
        .unwrap_err();
    assert!(matches!(missing, SendError::Io { .. }));
    assert_eq!(server.requests_to(UPLOAD_MEDIA).len(), 1);
}
