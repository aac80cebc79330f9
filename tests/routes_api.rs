#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

use acadwell::auth::create_jwt;
use acadwell::models::Role;
use acadwell::notify::LogNotifier;
use acadwell::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use acadwell::repo::inmem::InMemRepo;
use acadwell::routes::{config, AppState};
use acadwell::SecurityHeaders;

// Helper to ensure JWT secret present & unique temp data dir per test
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("ACADWELL_DATA_DIR", tmp.path().to_str().unwrap());
}

fn token(sub: &str, role: Role) -> String {
    create_jwt(sub, role).unwrap()
}

fn unlimited() -> RateLimiterFacade {
    RateLimiterFacade::new(InMemoryRateLimiter::new(false), RateLimitConfig::from_env())
}

fn state(repo: InMemRepo, limits: RateLimiterFacade) -> AppState {
    AppState { repo: Arc::new(repo), notifier: Arc::new(LogNotifier), limits }
}

fn bearer(tok: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {tok}"))
}

fn new_user_json(id: &str, role: &str, reg: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "role": role,
        "email": format!("{id}@uni.edu"),
        "credential_hash": "hash",
        "name": id.to_uppercase(),
        "university": null,
        "department": null,
        "anon_id": format!("anon-{id}"),
        "reg_number": reg,
    })
}

#[actix_web::test]
#[serial]
async fn test_full_community_flow_over_http() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state(InMemRepo::new(), unlimited())))
            .configure(config),
    )
    .await;

    let s1 = token("s1", Role::Student);
    let s2 = token("s2", Role::Student);

    // unauthenticated requests are refused
    let req = test::TestRequest::get().uri("/api/v1/users/me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // a caller may only provision their own record
    let req = test::TestRequest::post()
        .uri("/api/v1/users")
        .insert_header(bearer(&s1))
        .set_json(new_user_json("someone-else", "student", "R0"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    for (id, tok) in [("s1", &s1), ("s2", &s2)] {
        let req = test::TestRequest::post()
            .uri("/api/v1/users")
            .insert_header(bearer(tok))
            .set_json(new_user_json(id, "student", &format!("REG-{id}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
    }

    // s1 posts a question
    let req = test::TestRequest::post()
        .uri("/api/v1/community")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"question": "What is recursion?", "is_anonymous": false}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let post_id = post["id"].as_str().unwrap().to_string();

    // blank questions are rejected
    let req = test::TestRequest::post()
        .uri("/api/v1/community")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"question": "  "}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // s2 answers
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/community/{post_id}/answers"))
        .insert_header(bearer(&s2))
        .set_json(serde_json::json!({"text": "A function calling itself", "is_anonymous": false}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let answer: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let answer_id = answer["id"].as_str().unwrap().to_string();

    // s2 cannot accept on s1's question
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/community/{post_id}/accept/{answer_id}"))
        .insert_header(bearer(&s2))
        .set_json(serde_json::json!({"credits": 15}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);

    // s1 accepts with 15 credits
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/community/{post_id}/accept/{answer_id}"))
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"credits": 15}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let badge: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(badge["points"], 15);
    assert_eq!(badge["user_id"], "s2");
    assert_eq!(badge["type"], "Accepted Answer");

    // double accept conflicts
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/community/{post_id}/accept/{answer_id}"))
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"credits": 15}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // s2's balance moved exactly once; credential hash never serialized
    let req = test::TestRequest::get()
        .uri("/api/v1/users/me")
        .insert_header(bearer(&s2))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let me: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["credits"], 15);
    assert!(me.get("credential_hash").is_none());

    // audit badge visible to s2
    let req = test::TestRequest::get()
        .uri("/api/v1/badges/mine")
        .insert_header(bearer(&s2))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let badges: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(badges.as_array().unwrap().len(), 1);

    // likes accumulate without dedup
    for _ in 0..3 {
        let req = test::TestRequest::put()
            .uri(&format!("/api/v1/community/{post_id}/like"))
            .insert_header(bearer(&s2))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }
    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/community/{post_id}"))
        .insert_header(bearer(&s1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let post: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(post["likes"], 3);
    assert_eq!(post["accepted_answer_id"], answer_id.as_str());
}

#[actix_web::test]
#[serial]
async fn test_follow_and_chat_flow_over_http() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state(InMemRepo::new(), unlimited())))
            .configure(config),
    )
    .await;

    let t1 = token("t1", Role::Teacher);
    let s1 = token("s1", Role::Student);
    for (id, role, tok) in [("t1", "teacher", &t1), ("s1", "student", &s1)] {
        let req = test::TestRequest::post()
            .uri("/api/v1/users")
            .insert_header(bearer(tok))
            .set_json(new_user_json(id, role, &format!("REG-{id}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    // self-follow is a validation error
    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/send")
        .insert_header(bearer(&t1))
        .set_json(serde_json::json!({"to_id": "t1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // teacher follows student
    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/send")
        .insert_header(bearer(&t1))
        .set_json(serde_json::json!({"to_id": "s1"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    // duplicate send conflicts
    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/send")
        .insert_header(bearer(&t1))
        .set_json(serde_json::json!({"to_id": "s1"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // student sees the pending request
    let req = test::TestRequest::get()
        .uri("/api/v1/users/requests/pending")
        .insert_header(bearer(&s1))
        .to_request();
    let pending: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(pending[0]["id"], "t1");

    // accept -> connection in either field order, pending cleared
    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/accept")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"from_id": "t1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let conn: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let pair = (conn["user1"].as_str().unwrap(), conn["user2"].as_str().unwrap());
    assert!(pair == ("s1", "t1") || pair == ("t1", "s1"));

    let req = test::TestRequest::get()
        .uri("/api/v1/users/requests/pending")
        .insert_header(bearer(&s1))
        .to_request();
    let pending: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert!(pending.as_array().unwrap().is_empty());

    // second accept of the consumed request is a 404
    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/accept")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"from_id": "t1"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // chat now works between the connected pair
    let req = test::TestRequest::post()
        .uri("/api/v1/chat/messages/t1")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"text": "hello"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri("/api/v1/chat/messages/s1")
        .insert_header(bearer(&t1))
        .to_request();
    let history: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);

    // wellness summary reflects the sent message
    let req = test::TestRequest::get()
        .uri("/api/v1/wellness/summary")
        .insert_header(bearer(&s1))
        .to_request();
    let summary: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    assert_eq!(summary["peer_contributions"], 1);
    assert_eq!(summary["wellness_streak"], 1);
}

#[actix_web::test]
#[serial]
async fn test_accept_answer_defaults_to_ten_credits() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state(InMemRepo::new(), unlimited())))
            .configure(config),
    )
    .await;

    let s1 = token("s1", Role::Student);
    let s2 = token("s2", Role::Student);
    for (id, tok) in [("s1", &s1), ("s2", &s2)] {
        let req = test::TestRequest::post()
            .uri("/api/v1/users")
            .insert_header(bearer(tok))
            .set_json(new_user_json(id, "student", "R"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/community")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"question": "Q?"}))
        .to_request();
    let post: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    let post_id = post["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/community/{post_id}/answers"))
        .insert_header(bearer(&s2))
        .set_json(serde_json::json!({"text": "A."}))
        .to_request();
    let answer: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    let answer_id = answer["id"].as_str().unwrap().to_string();

    // no body at all: the default award of 10 credits applies
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/community/{post_id}/accept/{answer_id}"))
        .insert_header(bearer(&s1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let badge: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(badge["points"], 10);

    // zero credits are rejected up front
    let req = test::TestRequest::post()
        .uri("/api/v1/community")
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"question": "Q2?"}))
        .to_request();
    let post2: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    let post2_id = post2["id"].as_str().unwrap().to_string();
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/community/{post2_id}/answers"))
        .insert_header(bearer(&s2))
        .set_json(serde_json::json!({"text": "A2."}))
        .to_request();
    let answer2: serde_json::Value =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await).unwrap();
    let req = test::TestRequest::put()
        .uri(&format!(
            "/api/v1/community/{post2_id}/accept/{}",
            answer2["id"].as_str().unwrap()
        ))
        .insert_header(bearer(&s1))
        .set_json(serde_json::json!({"credits": 0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

fn multipart_grade_body(boundary: &str, csv: &str) -> Vec<u8> {
    let mut body = String::new();
    for (name, value) in [
        ("date", "2026-08-01"),
        ("semester", "5"),
        ("department", "CSE"),
        ("test_type", "internal"),
    ] {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"marks.csv\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n--{boundary}--\r\n"
    ));
    body.into_bytes()
}

#[actix_web::test]
#[serial]
async fn test_grade_upload_and_retrieval() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state(InMemRepo::new(), unlimited())))
            .configure(config),
    )
    .await;

    let t1 = token("t1", Role::Teacher);
    let s1 = token("s1", Role::Student);
    for (id, role, tok) in [("t1", "teacher", &t1), ("s1", "student", &s1)] {
        let req = test::TestRequest::post()
            .uri("/api/v1/users")
            .insert_header(bearer(tok))
            .set_json(new_user_json(id, role, &format!("REG-{id}")))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let boundary = "X-ACADWELL-TEST-BOUNDARY";
    let csv = "Roll No,Subject,Marks\nREG-s1,Maths,88\nREG-s1,Physics,74\nREG-other,Maths,50\n";

    // students may not upload
    let req = test::TestRequest::post()
        .uri("/api/v1/teacher/grades")
        .insert_header(bearer(&s1))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={boundary}")))
        .set_payload(multipart_grade_body(boundary, csv))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // teacher upload succeeds
    let req = test::TestRequest::post()
        .uri("/api/v1/teacher/grades")
        .insert_header(bearer(&t1))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={boundary}")))
        .set_payload(multipart_grade_body(boundary, csv))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let out: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(out["inserted"], 3);

    // teachers may not use the student view
    let req = test::TestRequest::get()
        .uri("/api/v1/student/grades")
        .insert_header(bearer(&t1))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    // student sees only their register number's rows
    let req = test::TestRequest::get()
        .uri("/api/v1/student/grades")
        .insert_header(bearer(&s1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let grades: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let rows = grades.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|g| g["reg_number"] == "REG-s1"));
    assert!(rows.iter().all(|g| g["teacher_name"] == "T1"));
}

#[actix_web::test]
#[serial]
async fn test_follow_rate_limit() {
    setup_env();
    let cfg = RateLimitConfig {
        follow_limit: 1,
        follow_window: Duration::from_secs(3600),
        ..RateLimitConfig::from_env()
    };
    let limits = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state(InMemRepo::new(), limits)))
            .configure(config),
    )
    .await;

    let a = token("a", Role::Student);
    let b = token("b", Role::Student);
    let c = token("c", Role::Student);
    for (id, tok) in [("a", &a), ("b", &b), ("c", &c)] {
        let req = test::TestRequest::post()
            .uri("/api/v1/users")
            .insert_header(bearer(tok))
            .set_json(new_user_json(id, "student", "R"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/send")
        .insert_header(bearer(&a))
        .set_json(serde_json::json!({"to_id": "b"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::post()
        .uri("/api/v1/users/requests/send")
        .insert_header(bearer(&a))
        .set_json(serde_json::json!({"to_id": "c"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);
}

#[actix_web::test]
#[serial]
async fn test_security_headers_present() {
    setup_env();
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::from_env())
            .app_data(actix_web::web::Data::new(state(InMemRepo::new(), unlimited())))
            .configure(config),
    )
    .await;

    let s1 = token("s1", Role::Student);
    let req = test::TestRequest::get()
        .uri("/api/v1/users/me")
        .insert_header(bearer(&s1))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let headers = resp.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("content-security-policy").is_some());
    assert!(headers.get("strict-transport-security").is_none());
}
