//! Drives the axum router through the auth and sign endpoints.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use blindcsp::api::{router, AppState};
use blindcsp::handlers::dummy::DummyHandler;
use blindcsp::protocol::AuthProtocol;
use blindcsp::{
    point_from_bytes, Error, KvStore, Message, ReadTxn, SigningEngine, SlipPreparer, SqliteKv,
    TokenStore, WriteTxn,
};
use std::sync::Arc;
use tower::ServiceExt;

const ROOT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const PROCESS: &str = "1111111111111111111111111111111111111111111111111111111111111111";

fn app() -> Router {
    app_with_store(Arc::new(SqliteKv::open_in_memory().unwrap()))
}

fn app_with_store(kv: Arc<dyn KvStore>) -> Router {
    let engine = SigningEngine::new(ROOT, Arc::new(TokenStore::new(kv))).unwrap();
    let protocol = AuthProtocol::new(Arc::new(engine), Arc::new(DummyHandler));
    router(Arc::new(AppState::new(protocol)))
}

struct UnwritableKv;

impl KvStore for UnwritableKv {
    fn write_txn(&self) -> blindcsp::Result<Box<dyn WriteTxn + '_>> {
        Err(Error::Storage("disk I/O error at /var/lib/blindcsp/tokens.db".into()))
    }

    fn read_txn(&self) -> blindcsp::Result<Box<dyn ReadTxn + '_>> {
        Err(Error::Storage("disk I/O error at /var/lib/blindcsp/tokens.db".into()))
    }
}

async fn post(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, Message) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Message) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_blind_flow_over_http() {
    let app = app();

    let (status, auth) = post(
        &app,
        &format!("/processes/{}/blind/auth", PROCESS),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(auth.ok);
    let token = auth.token.unwrap();

    let signer_r = point_from_bytes(&token).unwrap();
    let voter = SlipPreparer::new(&signer_r).unwrap();
    let slip = b"my vote".to_vec();
    let envelope = voter.place_slip_in_envelope(&slip);

    let sign_body = serde_json::json!({
        "token": format!("0x{}", hex::encode(&*token)),
        "payload": hex::encode(envelope.to_bytes()),
    });
    let uri = format!("/processes/{}/blind/sign", PROCESS);
    let (status, signed) = post(&app, &uri, sign_body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let sig = voter
        .signature_for_signed_envelope(&signed.signature.unwrap())
        .unwrap();

    let (_, pubkey) = get(&app, &format!("/processes/{}/blind/pubkey", PROCESS)).await;
    let salted = point_from_bytes(&pubkey.pub_key.unwrap()).unwrap();
    assert!(sig.verify(&slip, &salted));

    // the same R a second time
    let (status, again) = post(&app, &uri, sign_body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!again.ok);
    assert_eq!(again.reason.as_deref(), Some("token not found"));
}

#[tokio::test]
async fn test_plain_flow_over_http() {
    let app = app();
    let (_, auth) = post(
        &app,
        &format!("/processes/{}/ecdsa/auth", PROCESS),
        serde_json::json!({}),
    )
    .await;
    let token = auth.token.unwrap();
    assert_eq!(token.len(), 32);

    let (status, signed) = post(
        &app,
        &format!("/processes/{}/ecdsa/sign", PROCESS),
        serde_json::json!({ "token": hex::encode(&*token), "payload": "abcdef" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(signed.signature.unwrap().len(), 65);
}

#[tokio::test]
async fn test_sign_rejects_bad_input() {
    let app = app();
    let uri = format!("/processes/{}/ecdsa/sign", PROCESS);

    let (status, m) = post(&app, &uri, serde_json::json!({ "payload": "ab" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!m.ok);

    let (status, _) = post(&app, &uri, serde_json::json!({ "token": "ab" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, &uri, serde_json::json!({ "token": "zz", "payload": "ab" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &app,
        &format!("/processes/{}/rsa/sign", PROCESS),
        serde_json::json!({ "token": "ab", "payload": "ab" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, m) = post(
        &app,
        &uri,
        serde_json::json!({ "token": hex::encode([7u8; 32]), "payload": "ab" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(m.reason.as_deref(), Some("token not found"));
}

#[tokio::test]
async fn test_shared_key_over_http() {
    let app = app();
    let uri = format!("/processes/{}/sharedkey/auth", PROCESS);
    let (status, first) = post(&app, &uri, serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = post(&app, &uri, serde_json::json!({})).await;
    assert!(first.token.is_none());
    assert_eq!(first.shared_key, second.shared_key);
    assert!(first.shared_key.is_some());
}

#[tokio::test]
async fn test_root_pubkey_differs_from_salted() {
    let app = app();
    let (status, root) = get(&app, "/pubkey/ecdsa").await;
    assert_eq!(status, StatusCode::OK);
    let (_, salted) = get(&app, &format!("/processes/{}/ecdsa/pubkey", PROCESS)).await;
    assert_ne!(root.pub_key, salted.pub_key);
}

#[tokio::test]
async fn test_short_process_id_gets_no_token() {
    let app = app();
    for sign_type in ["ecdsa", "blind", "sharedkey"] {
        let (status, m) = post(
            &app,
            &format!("/processes/abcd/{}/auth", sign_type),
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", sign_type);
        assert!(!m.ok);
        assert!(m.token.is_none());
        assert!(m.shared_key.is_none());
    }
}

#[tokio::test]
async fn test_short_process_id_does_not_spend_token() {
    let app = app();
    let (_, auth) = post(
        &app,
        &format!("/processes/{}/ecdsa/auth", PROCESS),
        serde_json::json!({}),
    )
    .await;
    let body = serde_json::json!({
        "token": hex::encode(&*auth.token.unwrap()),
        "payload": "abcdef",
    });

    let (status, _) = post(&app, "/processes/abcd/ecdsa/sign", body.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, signed) = post(&app, &format!("/processes/{}/ecdsa/sign", PROCESS), body).await;
    assert_eq!(status, StatusCode::OK);
    assert!(signed.ok);
}

#[tokio::test]
async fn test_storage_failure_is_opaque() {
    let app = app_with_store(Arc::new(UnwritableKv));
    for sign_type in ["ecdsa", "blind"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/processes/{}/{}/auth", PROCESS, sign_type))
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("disk"), "{}", text);
        assert!(!text.contains("tokens.db"), "{}", text);

        let m: Message = serde_json::from_slice(&bytes).unwrap();
        assert!(!m.ok);
        assert_eq!(m.reason.as_deref(), Some("internal error"));
        assert!(m.token.is_none());
    }
}
