//! Integration tests: email action links, timeline, audit listing.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use logbook_api::server::{self, AppState};
use logbook_delivery::{DeliveryQueue, MockTransport, StaticProbe};
use logbook_docs::{DocumentPipeline, StubConverter};
use logbook_store::SqliteStore;
use logbook_types::{DeliveryConfig, ReportStore, Role, StorageConfig, User};
use logbook_workflow::WorkflowEngine;
use std::sync::Arc;
use tower::util::ServiceExt;

struct TestApp {
    router: axum::Router,
    engine: Arc<WorkflowEngine>,
    transport: Arc<MockTransport>,
    _dir: tempfile::TempDir,
}

fn user(id: &str, role: Role) -> User {
    User {
        user_id: id.to_string(),
        name: format!("{id} name"),
        role,
        email: format!("{}@example.com", id.to_lowercase()),
        emp_code: Some("E100".to_string()),
        designation: Some("Lead Dev".to_string()),
    }
}

async fn test_app(online: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("default_template.xlsx");
    let mut book = umya_spreadsheet::new_file();
    book.get_sheet_mut(&0)
        .unwrap()
        .get_cell_mut("A1")
        .set_value("{{site}}");
    umya_spreadsheet::writer::xlsx::write(&book, &template).unwrap();

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    for u in [
        user("owner", Role::User),
        user("rev", Role::Reviewer),
        user("A1", Role::Approver),
    ] {
        store.upsert_user(&u).await.unwrap();
    }

    let transport = Arc::new(MockTransport::new());
    let delivery = Arc::new(DeliveryQueue::new(
        store.clone(),
        store.clone(),
        store.clone(),
        transport.clone(),
        Arc::new(StaticProbe::new(online)),
        DeliveryConfig::default(),
    ));
    let engine = Arc::new(WorkflowEngine::new(
        store.clone(),
        store.clone(),
        DocumentPipeline::new(Arc::new(StubConverter::new())),
        delivery,
        StorageConfig {
            db_path: dir.path().join("unused.db"),
            output_dir: dir.path().join("approved"),
            default_template: template,
        },
    ));
    let router = server::router(Arc::new(AppState {
        engine: engine.clone(),
        audit_log: store,
    }));
    TestApp {
        router,
        engine,
        transport,
        _dir: dir,
    }
}

async fn endorsed_report(app: &TestApp) -> i64 {
    let report = app
        .engine
        .create_report("owner", "Night shift", None)
        .await
        .unwrap();
    let id = report.report_id;
    app.engine.set_field(id, "owner", "site", "Plant 2").await.unwrap();
    app.engine.submit(id, "owner").await.unwrap();
    app.engine.endorse(id, "rev").await.unwrap();
    id
}

/// Mails that carried the final PDF.
fn pdf_mails(app: &TestApp) -> usize {
    app.transport
        .sent()
        .iter()
        .filter(|m| m.attachment.is_some())
        .count()
}

async fn get_json(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_is_ok() {
    let app = test_app(true).await;
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn approve_link_offline_queues_mail() {
    let app = test_app(false).await;
    let id = endorsed_report(&app).await;

    let (status, j) = get_json(&app, &format!("/api/report/approve?report_id={id}&approver_id=A1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["success"], true);
    assert!(j["message"].as_str().unwrap().contains("queued for later"));
    assert_eq!(pdf_mails(&app), 0);

    let (status, j) = get_json(&app, &format!("/api/report/{id}/timeline")).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = j["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["submit", "endorse", "approve"]);
}

#[tokio::test]
async fn approve_link_online_sends_and_second_click_only_signs() {
    let app = test_app(true).await;
    let id = endorsed_report(&app).await;

    let (status, j) = get_json(&app, &format!("/api/report/approve?report_id={id}&admin_id=A1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(j["message"].as_str().unwrap().contains("emailed"));
    assert_eq!(pdf_mails(&app), 2);

    let (status, j) = get_json(&app, &format!("/api/report/approve?report_id={id}&approver_id=A1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(j["message"].as_str().unwrap().starts_with("Additional approval"));
    assert_eq!(pdf_mails(&app), 2);
}

#[tokio::test]
async fn approve_link_in_the_approver_mail_works() {
    let app = test_app(true).await;
    let id = endorsed_report(&app).await;

    let mail = app
        .transport
        .sent()
        .into_iter()
        .find(|m| m.to == "a1@example.com")
        .unwrap();
    let start = mail.html_body.find("href=\"").unwrap() + "href=\"".len();
    let end = start + mail.html_body[start..].find('"').unwrap();
    let link = mail.html_body[start..end]
        .replace("&#x3D;", "=")
        .replace("&amp;", "&");
    let path = link.strip_prefix("http://localhost:5050").unwrap();
    assert_eq!(path, format!("/api/report/approve?report_id={id}&approver_id=A1"));

    let (status, j) = get_json(&app, path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["success"], true);
    assert_eq!(app.engine.get_report(id).await.unwrap().status.as_str(), "approved");
}

#[tokio::test]
async fn bad_requests_are_reported_without_internals() {
    let app = test_app(true).await;

    let (status, j) = get_json(&app, "/api/report/approve?report_id=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["success"], false);

    let (status, j) = get_json(&app, "/api/report/approve?report_id=abc&approver_id=A1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["success"], false);
    assert!(j["message"].as_str().unwrap().contains("query string"));

    let (status, j) = get_json(&app, "/api/report/approve?report_id=404&approver_id=A1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(j["message"], "report 404 not found");

    let report = app.engine.create_report("owner", "Draft", None).await.unwrap();
    let (status, j) = get_json(
        &app,
        &format!("/api/report/approve?report_id={}&approver_id=A1", report.report_id),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(j["message"].as_str().unwrap().contains("draft"));
}

#[tokio::test]
async fn send_back_requires_comments_and_notifies_owner() {
    let app = test_app(true).await;
    let id = endorsed_report(&app).await;

    let (status, j) = get_json(&app, &format!("/api/report/send_back?report_id={id}&approver_id=A1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(j["message"].as_str().unwrap().contains("comments"));

    let (status, j) = get_json(
        &app,
        &format!("/api/report/send_back?report_id={id}&approver_id=A1&comments=Totals%20missing"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["success"], true);

    let notes = app.engine.notifications("owner", false).await.unwrap();
    assert!(notes.iter().any(|n| n.message.contains("Totals missing")));
}

#[tokio::test]
async fn audit_list_filters_and_pages() {
    let app = test_app(true).await;
    let first = endorsed_report(&app).await;
    endorsed_report(&app).await;

    let (status, j) = get_json(&app, &format!("/api/audit/list?report_id={first}")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = j["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["action"], "endorse");

    let (_, j) = get_json(&app, "/api/audit/list?actor_id=rev&limit=1").await;
    assert_eq!(j["data"].as_array().unwrap().len(), 1);

    let (status, _) = get_json(&app, "/api/audit/list?since=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, j) = get_json(&app, "/api/audit/list?limit=-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["success"], false);

    let (status, j) = get_json(&app, "/api/report/999/timeline").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(j["success"], false);

    let (status, j) = get_json(&app, "/api/report/latest/timeline").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(j["success"], false);
}
