use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{
    auth::open_session,
    config::Config,
    models::{College, Gender, User, VerificationStatus},
    router,
    state::State,
    storage::Store,
};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    state: Arc<State>,
    college: College,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(Config::local()).await
    }

    async fn with_config(config: Config) -> Self {
        let state = State::with_store(config, Store::memory());
        let college = state
            .store
            .create_college(College::new("SGGS", "sggs.ac.in"))
            .await
            .unwrap();

        Self {
            app: router(state.clone()),
            state,
            college,
        }
    }

    /// A verified student with a completed profile and an open session cookie.
    async fn student(&self, name: &str, gender: Gender) -> (User, String) {
        let mut user = User::new(&format!("{}@sggs.ac.in", name.to_lowercase()));
        user.first_name = Some(name.to_string());
        user.gender = Some(gender);
        user.college_id = Some(self.college.id);
        user.verification_status = VerificationStatus::Verified;
        let user = self.state.store.create_user(user).await.unwrap();

        let set_cookie = open_session(&self.state, user.id).await.unwrap();
        (user, cookie_pair(set_cookie.to_str().unwrap()))
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        Reply {
            status,
            headers,
            body,
        }
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Reply {
        self.send(request(Method::GET, uri, cookie, None)).await
    }

    async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> Reply {
        self.send(request(Method::POST, uri, cookie, Some(body))).await
    }
}

fn request(method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

/// A `multipart/form-data` POST with text fields and an optional
/// `profileImage` file part.
fn multipart(
    uri: &str,
    cookie: &str,
    fields: &[(&str, &str)],
    image: Option<(&str, &str)>,
) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    if let Some((file_name, content)) = image {
        body.push_str(&format!(
            "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"profileImage\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str("--XBOUNDARY--\r\n");

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=XBOUNDARY",
        )
        .body(Body::from(body))
        .unwrap()
}

fn rate(target: &User, score: u8) -> Value {
    json!({ "targetUserId": target.id.to_string(), "score": score })
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let reply = app.get("/health", None).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "status": "ok", "storage": "memory" }));
}

#[tokio::test]
async fn test_register_then_fetch_user() {
    let app = TestApp::new().await;

    let reply = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": " Priya@SGGS.ac.in ", "firstName": "Priya" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["email"], "priya@sggs.ac.in");
    assert_eq!(reply.body["verificationStatus"], "pending");
    assert_eq!(reply.body["collegeId"], app.college.id.to_string());

    let set_cookie = reply.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("campus_crush_sid="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    let cookie = cookie_pair(set_cookie);

    let me = app.get("/api/auth/user", Some(&cookie)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["firstName"], "Priya");
    assert!(me.body.get("ipHash").is_none());

    let again = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "priya@sggs.ac.in", "firstName": "Priya" }),
        )
        .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_register_rejects_foreign_domain() {
    let app = TestApp::new().await;

    let reply = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "someone@gmail.com", "firstName": "Someone" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let missing = app
        .post("/api/auth/register", None, json!({ "email": "nope" }))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    assert_eq!(missing.body["errors"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_login_and_logout() {
    let app = TestApp::new().await;
    let (user, _) = app.student("Rahul", Gender::Male).await;

    let unknown = app
        .post("/api/auth/login", None, json!({ "email": "ghost@sggs.ac.in" }))
        .await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.body["message"], "Invalid credentials");

    let reply = app
        .post(
            "/api/auth/login",
            None,
            json!({ "email": user.email, "password": "ignored" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["message"], "Login successful");
    assert_eq!(reply.body["user"]["id"], user.id.to_string());
    let cookie = cookie_pair(reply.headers[header::SET_COOKIE].to_str().unwrap());

    let out = app.post("/api/auth/logout", Some(&cookie), json!({})).await;
    assert_eq!(out.status, StatusCode::OK);
    assert!(
        out.headers[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );

    let after = app.get("/api/auth/user", Some(&cookie)).await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_redirect() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;

    let reply = app.get("/api/logout", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::FOUND);
    assert_eq!(reply.headers[header::LOCATION], "/");
}

#[tokio::test]
async fn test_requires_session() {
    let app = TestApp::new().await;

    let reply = app.get("/api/profile", None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body, json!({ "message": "Unauthorized" }));

    let bogus = app
        .get("/api/profile", Some("campus_crush_sid=not-a-session"))
        .await;
    assert_eq!(bogus.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_json() {
    let app = TestApp::new().await;
    let mut bad = request(Method::POST, "/api/auth/login", None, None);
    *bad.body_mut() = Body::from("{not json");
    bad.headers_mut()
        .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());

    let reply = app.send(bad).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["message"], "Malformed payload");
}

#[tokio::test]
async fn test_profile_setup() {
    let app = TestApp::new().await;
    let registered = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "ananya@sggs.ac.in", "firstName": "Ananya" }),
        )
        .await;
    let cookie = cookie_pair(registered.headers[header::SET_COOKIE].to_str().unwrap());

    let invalid = app
        .post(
            "/api/profile/setup",
            Some(&cookie),
            json!({ "collegeId": app.college.id, "gender": "robot" }),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.body["errors"][0]["field"], "gender");

    let reply = app
        .post(
            "/api/profile/setup",
            Some(&cookie),
            json!({
                "collegeId": app.college.id,
                "gender": "female",
                "displayName": "Ananya M",
                "bio": "Computer Science student"
            }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["verificationStatus"], "verified");
    assert_eq!(reply.body["verificationMethod"], "email");
    assert_eq!(reply.body["gender"], "female");
    assert_eq!(reply.body["displayName"], "Ananya M");
}

#[tokio::test]
async fn test_profile_setup_rejects_other_college() {
    let app = TestApp::new().await;
    let other = app
        .state
        .store
        .create_college(College::new("MIT", "mit.edu"))
        .await
        .unwrap();
    let (_, cookie) = app.student("Priya", Gender::Female).await;

    let reply = app
        .post(
            "/api/profile/setup",
            Some(&cookie),
            json!({ "collegeId": other.id, "gender": "female" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body["message"],
        "Email domain does not match the selected college"
    );
}

#[tokio::test]
async fn test_profile_image_upload() {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = Config::local();
    config.uploads_dir = uploads.path().to_path_buf();
    let app = TestApp::with_config(config).await;
    let (user, cookie) = app.student("Priya", Gender::Female).await;

    let upload = multipart(
        "/api/profile/image",
        &cookie,
        &[],
        Some(("me.png", "fake-png-bytes")),
    );

    let reply = app.send(upload).await;
    assert_eq!(reply.status, StatusCode::OK);

    let url = reply.body["profileImageUrl"].as_str().unwrap().to_string();
    assert!(url.starts_with(&format!("/uploads/profiles/{}-", user.id)));

    let served = app.get(&url, None).await;
    assert_eq!(served.status, StatusCode::OK);

    let me = app.get("/api/profile", Some(&cookie)).await;
    assert_eq!(me.body["profileImageUrl"], url);
}

#[tokio::test]
async fn test_profile_setup_multipart_with_image() {
    let uploads = tempfile::tempdir().unwrap();
    let mut config = Config::local();
    config.uploads_dir = uploads.path().to_path_buf();
    let app = TestApp::with_config(config).await;

    let registered = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "kavya@sggs.ac.in", "firstName": "Kavya" }),
        )
        .await;
    let user_id = registered.body["id"].as_str().unwrap().to_string();
    let cookie = cookie_pair(registered.headers[header::SET_COOKIE].to_str().unwrap());

    let college_id = app.college.id.to_string();
    let setup = multipart(
        "/api/profile/setup",
        &cookie,
        &[
            ("collegeId", college_id.as_str()),
            ("gender", "female"),
            ("displayName", "Kavya R"),
        ],
        Some(("portrait.webp", "fake-webp-bytes")),
    );

    let reply = app.send(setup).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["verificationStatus"], "verified");
    assert_eq!(reply.body["gender"], "female");
    assert_eq!(reply.body["displayName"], "Kavya R");

    let url = reply.body["profileImageUrl"].as_str().unwrap().to_string();
    assert!(url.starts_with(&format!("/uploads/profiles/{user_id}-")));
    assert!(url.ends_with(".webp"));

    let served = app.get(&url, None).await;
    assert_eq!(served.status, StatusCode::OK);

    let rejected = app
        .send(multipart(
            "/api/profile/setup",
            &cookie,
            &[("collegeId", college_id.as_str()), ("gender", "female")],
            Some(("notes.txt", "not an image")),
        ))
        .await;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected.body["message"], "Only image files are allowed");
}

#[tokio::test]
async fn test_colleges_listed() {
    let app = TestApp::new().await;

    let reply = app.get("/api/colleges", None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body[0]["emailDomain"], "sggs.ac.in");
}

#[tokio::test]
async fn test_rating_rules() {
    let app = TestApp::new().await;
    let (rahul, cookie) = app.student("Rahul", Gender::Male).await;
    let (priya, _) = app.student("Priya", Gender::Female).await;
    let (arjun, _) = app.student("Arjun", Gender::Male).await;

    let first = app.post("/api/ratings", Some(&cookie), rate(&priya, 8)).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["targetUserId"], priya.id.to_string());
    assert_eq!(first.body["score"], 8);
    assert_eq!(first.body["status"], "active");
    assert!(first.body.get("raterIdHash").is_none());

    let repeat = app.post("/api/ratings", Some(&cookie), rate(&priya, 9)).await;
    assert_eq!(repeat.status, StatusCode::CONFLICT);
    assert_eq!(repeat.body["message"], "You have already rated this user");

    let same_gender = app.post("/api/ratings", Some(&cookie), rate(&arjun, 5)).await;
    assert_eq!(same_gender.status, StatusCode::FORBIDDEN);

    let own = app.post("/api/ratings", Some(&cookie), rate(&rahul, 5)).await;
    assert_eq!(own.status, StatusCode::BAD_REQUEST);

    let invalid = app
        .post(
            "/api/ratings",
            Some(&cookie),
            json!({ "targetUserId": "x", "score": 0 }),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.body["message"], "Invalid rating data");
    assert_eq!(invalid.body["errors"].as_array().unwrap().len(), 2);

    let target = app.state.store.get_user(priya.id).await.unwrap().unwrap();
    assert_eq!(target.ratings_received, 1);
    assert_eq!(target.average_score, Some(8.0));
}

#[tokio::test]
async fn test_rating_unknown_target() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;
    let ghost = User::new("ghost@sggs.ac.in");

    let reply = app.post("/api/ratings", Some(&cookie), rate(&ghost, 5)).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_received_ratings_hide_rater() {
    let app = TestApp::new().await;
    let (_, rahul) = app.student("Rahul", Gender::Male).await;
    let (priya, priya_cookie) = app.student("Priya", Gender::Female).await;

    app.post("/api/ratings", Some(&rahul), rate(&priya, 7)).await;

    let reply = app.get("/api/ratings/received", Some(&priya_cookie)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let received = reply.body.as_array().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["score"], 7);
    assert!(received[0].get("targetUserId").is_none());
    assert!(received[0].get("raterIdHash").is_none());
}

#[tokio::test]
async fn test_random_profiles_skip_rated() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;
    let (priya, _) = app.student("Priya", Gender::Female).await;
    let (sneha, _) = app.student("Sneha", Gender::Female).await;
    app.student("Arjun", Gender::Male).await;

    let before = app.get("/api/profiles/random", Some(&cookie)).await;
    assert_eq!(before.status, StatusCode::OK);
    assert_eq!(before.body.as_array().unwrap().len(), 2);
    assert!(before.body[0].get("email").is_none());

    app.post("/api/ratings", Some(&cookie), rate(&priya, 6)).await;

    let after = app.get("/api/profiles/random", Some(&cookie)).await;
    let ids: Vec<_> = after
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|profile| profile["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, [sneha.id.to_string()]);
}

#[tokio::test]
async fn test_discovery_requires_profile() {
    let app = TestApp::new().await;
    let registered = app
        .post(
            "/api/auth/register",
            None,
            json!({ "email": "new@sggs.ac.in", "firstName": "New" }),
        )
        .await;
    let cookie = cookie_pair(registered.headers[header::SET_COOKIE].to_str().unwrap());

    let reply = app.get("/api/profiles/random", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["message"], "Please complete your profile first");
}

#[tokio::test]
async fn test_search_profiles() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;
    app.student("Priya", Gender::Female).await;
    app.student("Kavya", Gender::Female).await;

    let reply = app
        .get("/api/profiles/search?q=PRI", Some(&cookie))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body.as_array().unwrap().len(), 1);
    assert_eq!(reply.body[0]["firstName"], "Priya");

    let empty = app.get("/api/profiles/search?q=", Some(&cookie)).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_leaderboard() {
    let app = TestApp::new().await;
    let (priya, priya_cookie) = app.student("Priya", Gender::Female).await;

    for (index, score) in [9, 8, 9, 10, 9].into_iter().enumerate() {
        let (_, cookie) = app.student(&format!("Rater{index}"), Gender::Male).await;
        let reply = app.post("/api/ratings", Some(&cookie), rate(&priya, score)).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let computed = app
        .post("/api/admin/compute-leaderboard", Some(&priya_cookie), json!({}))
        .await;
    assert_eq!(computed.status, StatusCode::OK);

    for period in ["weekly", "all_time"] {
        let reply = app
            .get(
                &format!("/api/leaderboard?period={period}"),
                Some(&priya_cookie),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK);

        let board = reply.body.as_array().unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0]["rank"], 1);
        assert_eq!(board[0]["userId"], priya.id.to_string());
        assert_eq!(board[0]["averageScore"], 9.0);
        assert_eq!(board[0]["totalRatings"], 5);
        assert_eq!(board[0]["periodType"], period);
        assert_eq!(board[0]["user"]["firstName"], "Priya");
    }

    let bad = app
        .get("/api/leaderboard?period=monthly", Some(&priya_cookie))
        .await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rating_refreshes_leaderboard_in_background() {
    let app = TestApp::new().await;
    let (priya, priya_cookie) = app.student("Priya", Gender::Female).await;

    for (index, score) in [7, 8, 9, 8, 8].into_iter().enumerate() {
        let (_, cookie) = app.student(&format!("Rater{index}"), Gender::Male).await;
        let reply = app.post("/api/ratings", Some(&cookie), rate(&priya, score)).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let mut board = Vec::new();
    for _ in 0..100 {
        let reply = app.get("/api/leaderboard", Some(&priya_cookie)).await;
        assert_eq!(reply.status, StatusCode::OK);

        board = reply.body.as_array().unwrap().clone();
        if !board.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    assert_eq!(board.len(), 1);
    assert_eq!(board[0]["userId"], priya.id.to_string());
    assert_eq!(board[0]["totalRatings"], 5);
    assert_eq!(board[0]["averageScore"], 8.0);
}

#[tokio::test]
async fn test_leaderboard_read_before_recompute_not_served_stale() {
    let app = TestApp::new().await;
    let (priya, priya_cookie) = app.student("Priya", Gender::Female).await;

    let before = app
        .get("/api/leaderboard?period=all_time", Some(&priya_cookie))
        .await;
    assert_eq!(before.status, StatusCode::OK);
    assert!(before.body.as_array().unwrap().is_empty());

    for (index, score) in [6, 6, 6, 6, 6].into_iter().enumerate() {
        let (_, cookie) = app.student(&format!("Rater{index}"), Gender::Male).await;
        app.post("/api/ratings", Some(&cookie), rate(&priya, score)).await;
    }

    let computed = app
        .post("/api/admin/compute-leaderboard", Some(&priya_cookie), json!({}))
        .await;
    assert_eq!(computed.status, StatusCode::OK);

    let after = app
        .get("/api/leaderboard?period=all_time", Some(&priya_cookie))
        .await;
    let board = after.body.as_array().unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0]["userId"], priya.id.to_string());
    assert_eq!(board[0]["averageScore"], 6.0);
}

#[tokio::test]
async fn test_admin_routes_respect_allowlist() {
    let mut config = Config::local();
    config.admin_emails = vec!["dean@sggs.ac.in".to_string()];
    let app = TestApp::with_config(config).await;
    let (_, student) = app.student("Rahul", Gender::Male).await;
    let (_, dean) = app.student("Dean", Gender::Male).await;

    let denied = app.get("/api/admin/feedback", Some(&student)).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let denied = app
        .post("/api/admin/compute-leaderboard", Some(&student), json!({}))
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);

    let allowed = app.get("/api/admin/feedback", Some(&dean)).await;
    assert_eq!(allowed.status, StatusCode::OK);
}

#[tokio::test]
async fn test_appeals() {
    let app = TestApp::new().await;
    let (_, rahul_cookie) = app.student("Rahul", Gender::Male).await;
    let (priya, priya_cookie) = app.student("Priya", Gender::Female).await;

    let rating = app
        .post("/api/ratings", Some(&rahul_cookie), rate(&priya, 2))
        .await;
    let rating_id = rating.body["id"].as_str().unwrap().to_string();

    // Rahul gave the rating, he did not receive it.
    let not_his = app
        .post(
            "/api/appeals",
            Some(&rahul_cookie),
            json!({
                "ratingId": rating_id,
                "reason": "fake_rating",
                "description": "I never received this one"
            }),
        )
        .await;
    assert_eq!(not_his.status, StatusCode::NOT_FOUND);

    let filed = app
        .post(
            "/api/appeals",
            Some(&priya_cookie),
            json!({
                "ratingId": rating_id,
                "reason": "harassment",
                "description": "This score feels targeted at me"
            }),
        )
        .await;
    assert_eq!(filed.status, StatusCode::CREATED);
    assert_eq!(filed.body["status"], "pending");
    assert_eq!(filed.body["reason"], "harassment");

    let short = app
        .post(
            "/api/appeals",
            Some(&priya_cookie),
            json!({ "reason": "spam", "description": "short" }),
        )
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);

    let listed = app.get("/api/appeals", Some(&priya_cookie)).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
    assert_eq!(listed.body[0]["userId"], priya.id.to_string());

    let none = app.get("/api/appeals", Some(&rahul_cookie)).await;
    assert!(none.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_feedback() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;

    let created = app
        .post(
            "/api/feedback",
            Some(&cookie),
            json!({
                "type": "bug",
                "title": "Upload fails",
                "description": "Image upload spins forever on mobile",
                "rating": 3,
                "deviceInfo": "Android 14"
            }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["type"], "bug");
    assert_eq!(created.body["status"], "open");
    assert_eq!(created.body["priority"], "medium");

    let invalid = app
        .post(
            "/api/feedback",
            Some(&cookie),
            json!({ "type": "bug", "title": "Hi", "description": "x" }),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

    let mine = app.get("/api/feedback", Some(&cookie)).await;
    assert_eq!(mine.body.as_array().unwrap().len(), 1);

    let all = app.get("/api/admin/feedback?limit=1", Some(&cookie)).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rating_limit() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;
    let (priya, _) = app.student("Priya", Gender::Female).await;

    for _ in 0..10 {
        let reply = app.post("/api/ratings", Some(&cookie), rate(&priya, 5)).await;
        assert_ne!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(reply.headers.contains_key("ratelimit-remaining"));
    }

    let blocked = app.post("/api/ratings", Some(&cookie), rate(&priya, 5)).await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        blocked.body["message"],
        "Too many rating submissions, please slow down"
    );
    assert!(blocked.headers.contains_key(header::RETRY_AFTER));
    assert_eq!(blocked.headers["ratelimit-remaining"], "0");
}

#[tokio::test]
async fn test_auth_limit() {
    let app = TestApp::new().await;
    let attempt = json!({ "email": "ghost@sggs.ac.in" });

    for _ in 0..20 {
        let reply = app.post("/api/auth/login", None, attempt.clone()).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        // The stricter auth bucket reports, not the api one around it.
        assert_eq!(reply.headers["ratelimit-limit"], "20");
    }

    let blocked = app.post("/api/auth/login", None, attempt).await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        blocked.body["message"],
        "Too many authentication attempts, please try again later"
    );
    assert_eq!(blocked.headers["ratelimit-limit"], "20");
    assert_eq!(blocked.headers["ratelimit-remaining"], "0");

    // Other routes only count against the api bucket.
    let colleges = app.get("/api/colleges", None).await;
    assert_eq!(colleges.status, StatusCode::OK);
    assert_eq!(colleges.headers["ratelimit-limit"], "100");
}

#[tokio::test]
async fn test_api_limit() {
    let app = TestApp::new().await;

    for _ in 0..100 {
        let reply = app.get("/api/colleges", None).await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let blocked = app.get("/api/colleges", None).await;
    assert_eq!(blocked.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        blocked.body["message"],
        "Too many requests, please try again later"
    );
    assert!(blocked.headers.contains_key(header::RETRY_AFTER));

    // Clients are told apart by their first forwarded hop.
    let other = app
        .send(
            Request::builder()
                .uri("/api/colleges")
                .header("x-forwarded-for", "10.0.0.2, 10.0.0.1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(other.status, StatusCode::OK);

    let health = app.get("/health", None).await;
    assert_eq!(health.status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics() {
    let app = TestApp::new().await;
    let (_, cookie) = app.student("Rahul", Gender::Male).await;

    app.get("/api/colleges", None).await;
    app.get("/api/profile", None).await;

    let reply = app.get("/api/admin/metrics?errors=5", Some(&cookie)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["performance"]["totalRequests"], 2);
    assert_eq!(reply.body["performance"]["errorRate"], 50.0);
    assert_eq!(reply.body["performance"]["timeWindow"], "1 hour");

    let endpoints = reply.body["endpoints"].as_array().unwrap();
    assert!(
        endpoints
            .iter()
            .any(|stats| stats["endpoint"] == "GET /api/colleges")
    );
    assert!(reply.body["recentErrors"].as_array().unwrap().is_empty());
}
