use crate::support::{
    response_empty, response_json, signed_in_session, test_runtime, ScriptedServer,
};
use ragchat_core::storage::TOKEN_KEY;
use ragchat_core::{ApiClient, ApiError, DurableStorage, MessageType, Navigator, Route};

#[test]
fn memory_not_found_is_none() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server =
            ScriptedServer::start(vec![response_json(404, r#"{"message":"no memory"}"#)]).await;
        let (_session, storage) = signed_in_session(Some("u1"));
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        let memory = api.memory("u1", "c1").await.expect("memory");
        assert!(memory.is_none());

        let requests = server.requests();
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].target, "/ai/memory?userId=u1&conversationId=c1");
        assert_eq!(requests[0].header("authorization"), Some("Bearer jwt-test"));
    });
}

#[test]
fn memory_empty_or_null_body_is_none() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server =
            ScriptedServer::start(vec![response_empty(200), response_json(200, "null")]).await;
        let (_session, storage) = signed_in_session(Some("u1"));
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        assert!(api.memory("u1", "c1").await.expect("empty").is_none());
        assert!(api.memory("u1", "c1").await.expect("null").is_none());
    });
}

#[test]
fn memory_record_is_decoded() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let body = r#"{
            "conversationId": "c1",
            "userId": "u1",
            "messages": [
                {"content": "hi", "type": "USER", "timestamp": "2024-05-01T10:00:00"},
                {"content": "hello", "type": "ASSISTANT"}
            ],
            "maxMessages": 20
        }"#;
        let server = ScriptedServer::start(vec![response_json(200, body)]).await;
        let (_session, storage) = signed_in_session(Some("u1"));
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        let memory = api.memory("u1", "c1").await.expect("memory").expect("record");
        assert_eq!(memory.messages.len(), 2);
        assert_eq!(memory.messages[1].message_type, MessageType::Assistant);
        assert_eq!(memory.max_messages, Some(20));
    });
}

#[test]
fn server_error_message_propagates() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = ScriptedServer::start(vec![
            response_json(500, r#"{"message":"database offline"}"#),
            response_empty(503),
        ])
        .await;
        let (_session, storage) = signed_in_session(Some("u1"));
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        match api.user_conversations("u1").await {
            Err(ApiError::Status { status, message }) => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(message, "database offline");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        match api.conversation("c1").await {
            Err(ApiError::Status { message, .. }) => {
                assert_eq!(message, "HTTP error! status: 503");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    });
}

#[test]
fn created_conversation_without_id_is_a_protocol_error() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = ScriptedServer::start(vec![
            response_json(200, r#"{"title":"Trip"}"#),
            response_json(200, r#"{"id":"c9","title":"Trip"}"#),
        ])
        .await;
        let (_session, storage) = signed_in_session(Some("u1"));
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        let err = api.create_conversation("u1", "Trip").await.expect_err("no id");
        assert!(matches!(err, ApiError::Protocol(_)));

        let created = api.create_conversation("u1", "Trip").await.expect("created");
        assert_eq!(created.id, "c9");

        let requests = server.requests();
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].target, "/ai/users/u1/conversations");
        let body: serde_json::Value = serde_json::from_str(&requests[1].body).expect("json body");
        assert_eq!(body, serde_json::json!({"title": "Trip"}));
    });
}

#[test]
fn delete_and_share_carry_query_parameters() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = ScriptedServer::start(vec![
            response_empty(200),
            response_json(200, r#"{"shared":true}"#),
        ])
        .await;
        let (_session, storage) = signed_in_session(Some("u1"));
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        api.delete_conversation("c1", "u1").await.expect("delete");
        let shared = api.share_conversation("c1", "u1", "u2").await.expect("share");
        assert_eq!(shared["shared"], true);

        let requests = server.requests();
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(requests[0].target, "/ai/conversations/c1?userId=u1");
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].target, "/ai/conversations/c1/share?ownerId=u1&targetUserId=u2");
    });
}

#[test]
fn unauthorized_response_tears_down_session_and_redirects() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = ScriptedServer::start(vec![response_json(401, r#"{"error":"expired"}"#)]).await;
        let (session, storage) = signed_in_session(Some("u1"));
        let (api, events) = ApiClient::new(&server.settings(), storage.clone()).expect("client");
        let mut navigator = Navigator::new(session.clone(), events);
        assert_eq!(navigator.navigate(Route::Conversations), &Route::Conversations);

        let err = api.user_conversations("u1").await.expect_err("unauthorized");
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(storage.get(TOKEN_KEY).is_none());

        assert!(navigator.process_events());
        assert_eq!(navigator.current(), &Route::Login);
        assert!(!session.is_authenticated());
        assert_eq!(navigator.navigate(Route::Conversations), &Route::Login);
    });
}

#[test]
fn requests_without_token_carry_no_authorization() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = ScriptedServer::start(vec![response_json(200, "[]")]).await;
        let (_session, storage) = signed_in_session(None);
        let (api, _events) = ApiClient::new(&server.settings(), storage).expect("client");

        let conversations = api.user_conversations("u1").await.expect("list");
        assert!(conversations.is_empty());
        assert!(server.requests()[0].header("authorization").is_none());
    });
}
