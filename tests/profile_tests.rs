// tests/profile_tests.rs

mod common;

use common::spawn_app;
use serde_json::{Value, json};

#[tokio::test]
async fn profile_requires_login() {
    let app = spawn_app().await;

    let res = app.client.get(app.url("/api/profile/me")).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 401);

    let res = app
        .client
        .get(app.url("/api/profile/me"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 401);
}

#[tokio::test]
async fn profile_tracks_booked_exams() {
    // Arrange
    let app = spawn_app().await;
    let user_id = app.seed_user("cand@example.com", "password123", "candidate").await;
    let login = app.login("cand@example.com", "password123").await;
    app.seed_code("BAC2500123", Some(user_id)).await;
    app.seed_code("BAC2500124", Some(user_id)).await;
    app.seed_code("OTHER00001", None).await;

    let me = |app: &common::TestApp, token: String| {
        let req = app.client.get(app.url("/api/profile/me")).bearer_auth(token);
        async move {
            let res = req.send().await.unwrap();
            assert_eq!(res.status().as_u16(), 200);
            res.json::<Value>().await.unwrap()
        }
    };

    // Booked but not started
    let profile = me(&app, login.clone()).await;
    assert_eq!(profile["email"], "cand@example.com");
    assert_eq!(profile["role"], "candidate");
    let exams = profile["exams"].as_array().unwrap();
    assert_eq!(exams.len(), 2);
    assert!(exams.iter().all(|e| e["status"].is_null()));

    // Take one exam to the end
    let token = app.start_token("BAC2500123").await;
    app.finish_modules(&token).await;
    let res = app
        .session_post("/api/exam/session/complete", &token)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    // Start the other one only
    app.start_token("BAC2500124").await;

    let profile = me(&app, login).await;
    let exams = profile["exams"].as_array().unwrap();
    let done = exams.iter().find(|e| e["code"] == "BAC2500123").unwrap();
    assert_eq!(done["status"], "completed");
    assert_eq!(done["overall_band"], 7.0);

    let open = exams.iter().find(|e| e["code"] == "BAC2500124").unwrap();
    assert_eq!(open["status"], "not_started");
    assert!(open["overall_band"].is_null());
}
