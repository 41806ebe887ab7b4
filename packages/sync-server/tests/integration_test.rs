use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

mod common;

use common::{
    body_bytes, body_json, create_test_app, create_test_app_with, download_request, mint_token,
    multipart_body, upload_request, ADMIN_KEY,
};

const ZIP_A: &[u8] = b"PK\x03\x04first archive";
const ZIP_B: &[u8] = b"PK\x03\x04second, larger archive";

#[tokio::test]
async fn test_health() {
    let app = create_test_app().await;

    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn test_unknown_route_returns_envelope() {
    let app = create_test_app().await;

    let response = app
        .router
        .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_download_without_token_rejected() {
    let app = create_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/sync/download")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "MISSING_PARAMETERS");
}

#[tokio::test]
async fn test_upload_without_any_token_rejected() {
    let app = create_test_app().await;
    let body = multipart_body(&[("file", Some("quiz_data.zip"), ZIP_A)]);

    let response = app.router.oneshot(upload_request(None, body)).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "MISSING_PARAMETERS");
}

#[tokio::test]
async fn test_unknown_token_rejected() {
    let app = create_test_app().await;
    let body = multipart_body(&[("file", Some("quiz_data.zip"), ZIP_A)]);

    let response = app
        .router
        .oneshot(upload_request(Some("not-a-real-token"), body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "INVALID_API_KEY");
}

#[tokio::test]
async fn test_revoked_token_rejected() {
    let app = create_test_app().await;
    let token = mint_token(&app).await;
    app.state.ledger().revoke(&token).await.unwrap();

    let body = multipart_body(&[("file", Some("quiz_data.zip"), ZIP_A)]);
    let response = app
        .router
        .clone()
        .oneshot(upload_request(Some(&token), body))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "INACTIVE_API_KEY");

    let response = app.router.oneshot(download_request(&token)).await.unwrap();
    assert_eq!(body_json(response).await["error_code"], "INACTIVE_API_KEY");
}

#[tokio::test]
async fn test_second_upload_overwrites_first() {
    let app = create_test_app().await;
    let token = mint_token(&app).await;

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            Some(&token),
            multipart_body(&[("file", Some("quiz_data.zip"), ZIP_A)]),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["size"], ZIP_A.len());
    assert!(first["timestamp"].is_string());

    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            Some(&token),
            multipart_body(&[("file", Some("quiz_data.zip"), ZIP_B)]),
        ))
        .await
        .unwrap();
    let second = body_json(response).await;
    assert_eq!(second["filename"], first["filename"]);

    let response = app
        .router
        .clone()
        .oneshot(download_request(&token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"quiz_data.zip\""
    );
    assert_eq!(body_bytes(response).await, ZIP_B);

    let stored = std::fs::read_dir(app.state.archives().dir())
        .unwrap()
        .filter_map(Result::ok)
        .count();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn test_tokens_have_separate_slots() {
    let app = create_test_app().await;
    let alice = mint_token(&app).await;
    let bob = mint_token(&app).await;

    app.router
        .clone()
        .oneshot(upload_request(
            Some(&alice),
            multipart_body(&[("file", Some("quiz_data.zip"), ZIP_A)]),
        ))
        .await
        .unwrap();

    let response = app.router.oneshot(download_request(&bob)).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "FILE_NOT_FOUND");
}

#[tokio::test]
async fn test_legacy_form_field_token() {
    let app = create_test_app().await;
    let token = mint_token(&app).await;

    let body = multipart_body(&[
        ("api_key", None, token.as_bytes()),
        ("file", Some("quiz_data.zip"), ZIP_A),
    ]);
    let response = app
        .router
        .clone()
        .oneshot(upload_request(None, body))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["success"], true);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri(format!("/api/sync/download?api_key={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, ZIP_A);
}

#[tokio::test]
async fn test_non_zip_upload_rejected() {
    let app = create_test_app().await;
    let token = mint_token(&app).await;

    let body = multipart_body(&[("file", Some("quiz_data.zip"), b"SQLite format 3\0")]);
    let response = app
        .router
        .clone()
        .oneshot(upload_request(Some(&token), body))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "INVALID_FILE_TYPE");

    let response = app.router.oneshot(download_request(&token)).await.unwrap();
    assert_eq!(body_json(response).await["error_code"], "FILE_NOT_FOUND");
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let app = create_test_app().await;
    let token = mint_token(&app).await;

    let body = multipart_body(&[("note", None, b"hello")]);
    let response = app
        .router
        .oneshot(upload_request(Some(&token), body))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "MISSING_PARAMETERS");
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let app = create_test_app_with(|config| config.max_upload_bytes = 16).await;
    let token = mint_token(&app).await;

    let mut payload = b"PK\x03\x04".to_vec();
    payload.extend(std::iter::repeat(b'x').take(64));
    let body = multipart_body(&[("file", Some("quiz_data.zip"), &payload)]);

    let response = app
        .router
        .oneshot(upload_request(Some(&token), body))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "FILE_TOO_LARGE");
}

#[tokio::test]
async fn test_key_management_requires_admin_key() {
    let app = create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/keys")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "MISSING_ADMIN_KEY");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/keys")
                .header("X-Admin-Key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "UNAUTHORIZED");

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/keys?admin_key={ADMIN_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let token = body["api_key"].as_str().unwrap();
    app.state.ledger().validate(token).await.unwrap();
}

#[tokio::test]
async fn test_key_minting_refused_without_configured_admin_key() {
    let app = create_test_app_with(|_| {}).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/keys")
                .header("X-Admin-Key", "anything")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "MISSING_ADMIN_KEY");
}

#[tokio::test]
async fn test_list_and_revoke_keys() {
    let app = create_test_app().await;
    let token = mint_token(&app).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/keys/{token}/revoke"))
                .header("X-Admin-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["success"], true);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/keys")
                .header("X-Admin-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["token"], token.as_str());
    assert_eq!(keys[0]["status"], "revoked");

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/keys/unknown/revoke")
                .header("X-Admin-Key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "INVALID_API_KEY");
}

#[tokio::test]
async fn test_legacy_ledger_imported_on_startup() {
    let csv_dir = tempfile::TempDir::new().unwrap();
    let csv_path = csv_dir.path().join("uuid.csv");
    std::fs::write(
        &csv_path,
        "uuid,created_at,last_used,status\n\
         aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee,2024-03-01 08:00:00,2024-03-01 08:00:00,active\n\
         ffffffff-bbbb-4ccc-8ddd-eeeeeeeeeeee,2024-03-01 08:00:00,2024-03-01 08:00:00,inactive\n",
    )
    .unwrap();

    let path = csv_path.clone();
    let app = create_test_app_with(move |config| config.legacy_ledger_csv = Some(path)).await;

    let body = multipart_body(&[("file", Some("quiz_data.zip"), ZIP_A)]);
    let response = app
        .router
        .clone()
        .oneshot(upload_request(
            Some("aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee"),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["success"], true);

    let response = app
        .router
        .oneshot(download_request("ffffffff-bbbb-4ccc-8ddd-eeeeeeeeeeee"))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["error_code"], "INACTIVE_API_KEY");
}
