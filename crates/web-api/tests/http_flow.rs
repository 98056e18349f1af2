mod support;

use reqwest::{multipart, Client, StatusCode};
use serde_json::{json, Value};

use domain::{TenantId, TenantRole};
use support::TestServer;

async fn create_channel(client: &Client, server: &TestServer, token: &str, name: &str, private: bool) -> Value {
    let response = client
        .post(server.url("/channels"))
        .bearer_auth(token)
        .json(&json!({ "name": name, "is_private": private }))
        .send()
        .await
        .expect("create channel");
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.expect("channel json")
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let server = TestServer::start().await;
    let response = Client::new()
        .get(server.url("/channels"))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");

    let health = Client::new()
        .get(format!("http://{}/health", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn channel_message_lifecycle() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let alice = server.user(tenant, "alice").await;
    let bob = server.user(tenant, "bob").await;

    let channel = create_channel(&client, &server, &alice.token, "general", false).await;
    let channel_id = channel["id"].as_str().unwrap().to_owned();

    let join = client
        .post(server.url(&format!("/channels/{channel_id}/join")))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(join.status(), StatusCode::CREATED);

    let sent: Value = client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&alice.token)
        .json(&json!({ "body": "hello team" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let message_id = sent["id"].as_str().unwrap().to_owned();
    assert_eq!(sent["author"]["display_name"], "alice");

    // 回复
    let reply = client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&bob.token)
        .json(&json!({ "body": "hi!", "parent_message_id": message_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(reply.status(), StatusCode::CREATED);
    let reply: Value = reply.json().await.unwrap();

    let nested = client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&alice.token)
        .json(&json!({ "body": "deeper", "parent_message_id": reply["id"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(nested.status(), StatusCode::BAD_REQUEST);
    let nested: Value = nested.json().await.unwrap();
    assert_eq!(nested["code"], "THREAD_DEPTH_EXCEEDED");

    // 历史只包含顶层消息，带线程汇总
    let page: Value = client
        .get(server.url(&format!("/channels/{channel_id}/messages?limit=10")))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["messages"][0]["thread"]["reply_count"], 1);
    assert_eq!(page["has_more"], false);

    let thread: Value = client
        .get(server.url(&format!("/messages/{message_id}/thread")))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(thread.as_array().unwrap().len(), 1);

    // 只有作者能编辑
    let forbidden = client
        .patch(server.url(&format!("/messages/{message_id}")))
        .bearer_auth(&bob.token)
        .json(&json!({ "body": "hijack" }))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let edited: Value = client
        .patch(server.url(&format!("/messages/{message_id}")))
        .bearer_auth(&alice.token)
        .json(&json!({ "body": "hello everyone" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(edited["body"], "hello everyone");
    assert!(edited["edited_at"].is_string());

    // 表情：重复添加不新建
    let first = client
        .post(server.url(&format!("/messages/{message_id}/reactions")))
        .bearer_auth(&bob.token)
        .json(&json!({ "emoji": "🎉" }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let again = client
        .post(server.url(&format!("/messages/{message_id}/reactions")))
        .bearer_auth(&bob.token)
        .json(&json!({ "emoji": "🎉" }))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::OK);
    let removed = client
        .delete(server.url(&format!("/messages/{message_id}/reactions/%F0%9F%8E%89")))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    let missing = client
        .delete(server.url(&format!("/messages/{message_id}/reactions/%F0%9F%8E%89")))
        .bearer_auth(&bob.token)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    // 已读
    let read = client
        .post(server.url("/reads"))
        .bearer_auth(&bob.token)
        .json(&json!({
            "target_type": "channel",
            "target_id": channel_id,
            "last_read_message_id": message_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(read.status(), StatusCode::OK);
    let state: Value = client
        .get(server.url(&format!("/reads/channel/{channel_id}")))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state["receipts"].as_array().unwrap().len(), 1);

    // 删除后不可再删
    let deleted = client
        .delete(server.url(&format!("/messages/{message_id}")))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let twice = client
        .delete(server.url(&format!("/messages/{message_id}")))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap();
    assert_eq!(twice.status(), StatusCode::BAD_REQUEST);
    let twice: Value = twice.json().await.unwrap();
    assert_eq!(twice["code"], "MESSAGE_DELETED");
}

#[tokio::test]
async fn private_channels_and_tenant_isolation() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let owner = server.user(tenant, "owner").await;
    let member = server.user(tenant, "member").await;
    let outsider = server.user(TenantId::generate(), "outsider").await;

    let channel = create_channel(&client, &server, &owner.token, "secret", true).await;
    let channel_id = channel["id"].as_str().unwrap().to_owned();

    let join = client
        .post(server.url(&format!("/channels/{channel_id}/join")))
        .bearer_auth(&member.token)
        .send()
        .await
        .unwrap();
    assert_eq!(join.status(), StatusCode::FORBIDDEN);

    let read = client
        .get(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&member.token)
        .send()
        .await
        .unwrap();
    assert_eq!(read.status(), StatusCode::FORBIDDEN);

    let cross_tenant = client
        .get(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&outsider.token)
        .send()
        .await
        .unwrap();
    assert_eq!(cross_tenant.status(), StatusCode::NOT_FOUND);

    let added = client
        .post(server.url(&format!("/channels/{channel_id}/members")))
        .bearer_auth(&owner.token)
        .json(&json!({ "user_id": member.user_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::CREATED);

    let visible: Value = client
        .get(server.url("/channels"))
        .bearer_auth(&member.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(visible.as_array().unwrap().len(), 1);

    let left = client
        .delete(server.url(&format!("/channels/{channel_id}/leave")))
        .bearer_auth(&member.token)
        .send()
        .await
        .unwrap();
    assert_eq!(left.status(), StatusCode::NO_CONTENT);

    let last = client
        .delete(server.url(&format!("/channels/{channel_id}/leave")))
        .bearer_auth(&owner.token)
        .send()
        .await
        .unwrap();
    assert_eq!(last.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn direct_messages_are_deduplicated() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let alice = server.user(tenant, "alice").await;
    let bob = server.user(tenant, "bob").await;
    let carol = server.user(tenant, "carol").await;

    let opened = client
        .post(server.url("/dm"))
        .bearer_auth(&alice.token)
        .json(&json!({ "member_ids": [bob.user_id] }))
        .send()
        .await
        .unwrap();
    assert_eq!(opened.status(), StatusCode::CREATED);
    let opened: Value = opened.json().await.unwrap();
    let thread_id = opened["thread"]["id"].as_str().unwrap().to_owned();

    let reopened = client
        .post(server.url("/dm"))
        .bearer_auth(&bob.token)
        .json(&json!({ "member_ids": [alice.user_id] }))
        .send()
        .await
        .unwrap();
    assert_eq!(reopened.status(), StatusCode::OK);
    let reopened: Value = reopened.json().await.unwrap();
    assert_eq!(reopened["thread"]["id"], thread_id.as_str());

    let sent = client
        .post(server.url(&format!("/dm/{thread_id}/messages")))
        .bearer_auth(&bob.token)
        .json(&json!({ "body": "psst" }))
        .send()
        .await
        .unwrap();
    assert_eq!(sent.status(), StatusCode::CREATED);

    let snooping = client
        .get(server.url(&format!("/dm/{thread_id}/messages")))
        .bearer_auth(&carol.token)
        .send()
        .await
        .unwrap();
    assert_eq!(snooping.status(), StatusCode::FORBIDDEN);

    let unread: Value = client
        .get(server.url("/unread"))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unread[0]["unread_count"], 1);
}

#[tokio::test]
async fn sends_beyond_the_window_are_rate_limited() {
    let server = TestServer::start_with_rate_limit(2).await;
    let client = Client::new();
    let alice = server.user(TenantId::generate(), "alice").await;
    let channel = create_channel(&client, &server, &alice.token, "busy", false).await;
    let channel_id = channel["id"].as_str().unwrap().to_owned();

    for _ in 0..2 {
        let ok = client
            .post(server.url(&format!("/channels/{channel_id}/messages")))
            .bearer_auth(&alice.token)
            .json(&json!({ "body": "spam" }))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::CREATED);
    }

    let limited = client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&alice.token)
        .json(&json!({ "body": "spam" }))
        .send()
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key("retry-after"));

    // 被拒绝的发送没有落库
    let page: Value = client
        .get(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&alice.token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn uploads_are_linked_to_messages_once() {
    let server = TestServer::start().await;
    let client = Client::new();
    let admin = server
        .user_with_role(TenantId::generate(), "admin", TenantRole::Admin)
        .await;
    let channel = create_channel(&client, &server, &admin.token, "files", false).await;
    let channel_id = channel["id"].as_str().unwrap().to_owned();

    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(b"meeting notes".to_vec())
            .file_name("notes.txt")
            .mime_str("text/plain")
            .unwrap(),
    );
    let uploaded = client
        .post(server.url("/uploads"))
        .bearer_auth(&admin.token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    let attachment: Value = uploaded.json().await.unwrap();
    assert_eq!(attachment["file_name"], "notes.txt");

    let rejected_type = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(vec![0u8; 4])
            .file_name("run.exe")
            .mime_str("application/x-msdownload")
            .unwrap(),
    );
    let rejected = client
        .post(server.url("/uploads"))
        .bearer_auth(&admin.token)
        .multipart(rejected_type)
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let sent: Value = client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&admin.token)
        .json(&json!({ "body": "see attached", "attachment_ids": [attachment["id"]] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sent["attachments"][0]["id"], attachment["id"]);

    let reused = client
        .post(server.url(&format!("/channels/{channel_id}/messages")))
        .bearer_auth(&admin.token)
        .json(&json!({ "body": "again", "attachment_ids": [attachment["id"]] }))
        .send()
        .await
        .unwrap();
    assert_eq!(reused.status(), StatusCode::BAD_REQUEST);
    let reused: Value = reused.json().await.unwrap();
    assert_eq!(reused["code"], "ATTACHMENT_UNAVAILABLE");
}

#[tokio::test]
async fn dm_member_list_may_include_the_caller() {
    let server = TestServer::start().await;
    let client = Client::new();
    let tenant = TenantId::generate();
    let alice = server.user(tenant, "alice").await;
    let mut member_ids = vec![alice.user_id];
    for index in 0..10 {
        member_ids.push(server.user(tenant, &format!("user{index}")).await.user_id);
    }

    let opened = client
        .post(server.url("/dm"))
        .bearer_auth(&alice.token)
        .json(&json!({ "member_ids": member_ids }))
        .send()
        .await
        .unwrap();
    assert_eq!(opened.status(), StatusCode::CREATED);
    let opened: Value = opened.json().await.unwrap();
    assert_eq!(opened["thread"]["member_ids"].as_array().unwrap().len(), 11);
}
