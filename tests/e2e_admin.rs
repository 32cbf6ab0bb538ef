//! E2E tests for the admin API

mod common;

use common::TestServer;
use serde_json::Value;

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/api/admin/login"))
        .json(&serde_json::json!({ "password": "guess" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let server = TestServer::new().await;

    for path in ["/api/admin/stats", "/api/admin/codes", "/api/admin/applications"] {
        let response = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 401, "{path}");

        let response = server
            .client
            .get(server.url(path))
            .bearer_auth("forged.token")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401, "{path}");
    }
}

#[tokio::test]
async fn test_batch_issue_returns_links() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let response = server
        .client
        .post(server.url("/api/admin/codes/batch"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "users": [
                { "userName": "alice", "userId": "wx_alice" },
                { "userName": "bob" },
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);

    let codes = body["codes"].as_array().unwrap();
    assert_eq!(codes[0]["userId"], "wx_alice");
    assert_eq!(codes[1]["userId"], "bob");
    assert_ne!(codes[0]["code"], codes[1]["code"]);
    for issued in codes {
        let link = issued["link"].as_str().unwrap();
        assert!(link.starts_with("http://localhost:3000/?token="));
    }

    let listed: Value = server
        .client
        .get(server.url("/api/admin/codes?source=batch"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 2);
    assert_eq!(listed["codes"][0]["note"], "batch issue");

    // Batch issuance is not an application.
    let applications: Value = server
        .client
        .get(server.url("/api/admin/applications"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(applications["total"], 0);
}

#[tokio::test]
async fn test_batch_issue_rejects_empty_list() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let response = server
        .client
        .post(server.url("/api/admin/codes/batch"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "users": [] }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "user list is empty");
}

#[tokio::test]
async fn test_stats_count_codes_and_recent_applications() {
    let server = TestServer::new().await;
    let token = server.admin_token().await;

    let applied: Value = server
        .apply(
            "zhang",
            "zhangsan",
            "this app is great, really insightful!!",
            None,
        )
        .await
        .json()
        .await
        .unwrap();
    server.apply("li", "li", "too short", None).await;
    server
        .verify_code(applied["code"].as_str().unwrap())
        .await;

    let body: Value = server
        .client
        .get(server.url("/api/admin/stats"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["stats"]["total"], 1);
    assert_eq!(body["stats"]["used"], 1);
    assert_eq!(body["stats"]["selfApply"], 1);
    assert_eq!(body["recentApplications"].as_array().unwrap().len(), 3);

    let rejected: Value = server
        .client
        .get(server.url("/api/admin/applications?status=rejected"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rejected["total"], 1);
    assert_eq!(rejected["applications"][0]["userName"], "li");
}
