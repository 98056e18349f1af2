mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};

use domain::TenantId;
use support::TestServer;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send_frame(ws: &mut Socket, frame: Value) {
    ws.send(TungsteniteMessage::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// 跳过不相关的帧，直到谓词命中
async fn next_matching(ws: &mut Socket, predicate: impl Fn(&Value) -> bool) -> Value {
    let wait = async {
        loop {
            let message = ws.next().await.expect("stream open").expect("frame");
            if let TungsteniteMessage::Text(text) = message {
                let frame: Value = serde_json::from_str(text.as_str()).expect("json frame");
                if predicate(&frame) {
                    return frame;
                }
            }
        }
    };
    timeout(Duration::from_secs(5), wait)
        .await
        .expect("frame within timeout")
}

async fn create_channel(client: &Client, server: &TestServer, token: &str, private: bool) -> String {
    let channel: Value = client
        .post(server.url("/channels"))
        .bearer_auth(token)
        .json(&json!({ "name": "realtime", "is_private": private }))
        .send()
        .await
        .expect("create channel")
        .json()
        .await
        .expect("channel json");
    channel["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn rejects_invalid_tokens() {
    let server = TestServer::start().await;
    let result = connect_async(server.ws_url("not-a-token")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn subscribed_sockets_receive_conversation_events() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let alice = server.user(tenant, "alice").await;
    let bob = server.user(tenant, "bob").await;
    let channel_id = create_channel(&client, &server, &alice.token, false).await;

    let (mut ws, _) = connect_async(server.ws_url(&bob.token)).await.expect("connect");
    send_frame(
        &mut ws,
        json!({ "type": "subscribe", "target": { "kind": "channel", "id": channel_id } }),
    )
    .await;
    let subscribed = next_matching(&mut ws, |frame| frame["type"] != "event").await;
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["target"]["id"], channel_id.as_str());

    client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&alice.token)
        .json(&json!({ "body": "live update" }))
        .send()
        .await
        .expect("send message");

    let event = next_matching(&mut ws, |frame| frame["event"]["type"] == "NEW_MESSAGE").await;
    assert_eq!(event["topic"], format!("chat:channel:{channel_id}"));
    assert_eq!(event["event"]["payload"]["body"], "live update");

    send_frame(
        &mut ws,
        json!({ "type": "unsubscribe", "target": { "kind": "channel", "id": channel_id } }),
    )
    .await;
    let unsubscribed = next_matching(&mut ws, |frame| frame["type"] == "unsubscribed").await;
    assert_eq!(unsubscribed["target"]["kind"], "channel");
}

#[tokio::test]
async fn private_channels_require_membership_to_subscribe() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let owner = server.user(tenant, "owner").await;
    let stranger = server.user(tenant, "stranger").await;
    let channel_id = create_channel(&client, &server, &owner.token, true).await;

    let (mut ws, _) = connect_async(server.ws_url(&stranger.token)).await.expect("connect");
    send_frame(
        &mut ws,
        json!({ "type": "subscribe", "target": { "kind": "channel", "id": channel_id } }),
    )
    .await;
    let error = next_matching(&mut ws, |frame| frame["type"] == "error").await;
    assert_eq!(error["code"], "CHANNEL_PRIVATE");

    send_frame(&mut ws, json!({ "type": "bogus" })).await;
    let invalid = next_matching(&mut ws, |frame| frame["type"] == "error").await;
    assert_eq!(invalid["code"], "INVALID_FRAME");
}

#[tokio::test]
async fn direct_messages_reach_members_on_their_personal_topic() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let alice = server.user(tenant, "alice").await;
    let bob = server.user(tenant, "bob").await;

    let (mut ws, _) = connect_async(server.ws_url(&bob.token)).await.expect("connect");
    // 等待自己的上线事件，确认订阅已生效
    next_matching(&mut ws, |frame| frame["event"]["type"] == "PRESENCE_UPDATED").await;

    let opened = client
        .post(server.url("/dm"))
        .bearer_auth(&alice.token)
        .json(&json!({ "member_ids": [bob.user_id] }))
        .send()
        .await
        .expect("open dm");
    assert_eq!(opened.status(), reqwest::StatusCode::CREATED);

    let created = next_matching(&mut ws, |frame| frame["event"]["type"] == "DM_THREAD_CREATED").await;
    assert_eq!(created["topic"], format!("user:{}:{}", tenant, bob.user_id));
}

#[tokio::test]
async fn heartbeat_frames_return_presence() {
    let server = TestServer::start().await;
    let alice = server.user(TenantId::generate(), "alice").await;

    let (mut ws, _) = connect_async(server.ws_url(&alice.token)).await.expect("connect");
    send_frame(&mut ws, json!({ "type": "heartbeat" })).await;
    let presence = next_matching(&mut ws, |frame| frame["type"] == "presence").await;
    assert_eq!(presence["presence"]["status"], "online");
    assert_eq!(presence["presence"]["connections"], 1);
    assert_eq!(presence["presence"]["user_id"], alice.user_id.to_string());
}
