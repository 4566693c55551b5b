use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use stratum_api::app::{self, AppState};
use stratum_infra::{AppConfig, InMemoryDirectory, InMemoryOutbox};

const JWT_SECRET: &str = "test-secret";
const COMPANY_EMAIL: &str = "root@acme.test";

struct TestServer {
    base_url: String,
    outbox: InMemoryOutbox,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Same router as prod over an in-memory directory, bound to an ephemeral port.
    async fn spawn(rate_limit_capacity: u32) -> Self {
        let capacity = rate_limit_capacity.to_string();
        let config = AppConfig::from_lookup(|key| {
            let value = match key {
                "JWT_SECRET" => JWT_SECRET,
                "BCRYPT_COST" => "4",
                "RATE_LIMIT_CAPACITY" => capacity.as_str(),
                "RATE_LIMIT_WINDOW_SECS" => "60",
                "RATE_LIMIT_BLOCK_SECS" => "900",
                "BOOTSTRAP_COMPANY_NAME" => "Acme",
                "BOOTSTRAP_COMPANY_EMAIL" => COMPANY_EMAIL,
                _ => return None,
            };
            Some(value.to_string())
        })
        .expect("test config");

        let outbox = InMemoryOutbox::new();
        let state = AppState::build(&config, InMemoryDirectory::arc(), Arc::new(outbox.clone()))
            .expect("failed to wire services");
        let bootstrap = config.bootstrap.as_ref().expect("bootstrap configured");
        state
            .services
            .engine
            .bootstrap_company(&bootstrap.name, &bootstrap.email)
            .await
            .expect("bootstrap failed");

        let app = app::build_app(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self { base_url, outbox, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Credential mail is delivered by a detached task; poll until it lands.
    async fn mailed_password(&self, email: &str) -> String {
        for _ in 0..200 {
            if let Some(password) = self.outbox.password_for(email) {
                return password;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("no credentials mailed to {email}");
    }

    async fn login(&self, client: &reqwest::Client, email: &str) -> String {
        let password = self.mailed_password(email).await;
        let res = client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        if res.status() != StatusCode::OK {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            panic!("expected 200 OK from login as {email}, got {status} body={body}");
        }
        let body: Value = res.json().await.unwrap();
        body["access_token"].as_str().unwrap().to_string()
    }

    async fn create(&self, client: &reqwest::Client, token: &str, body: Value) -> Value {
        let res = client
            .post(self.url("/subordinates"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        if res.status() != StatusCode::CREATED {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            panic!("expected 201 Created for {body}, got {status} body={text}");
        }
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(principal_id: i64, email: &str, role: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": principal_id,
        "email": email,
        "role": role,
        "kind": "access",
        "iat": now,
        "exp": now + 600,
    });

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

/// Company → organisation → super admin, returning the super admin's token.
async fn super_admin(srv: &TestServer, client: &reqwest::Client) -> String {
    let company = srv.login(client, COMPANY_EMAIL).await;
    srv.create(
        client,
        &company,
        json!({ "kind": "organisation", "head_name": "Org", "head_email": "org@acme.test" }),
    )
    .await;
    let org = srv.login(client, "org@acme.test").await;
    srv.create(
        client,
        &org,
        json!({ "kind": "super_admin", "head_name": "Sam", "head_email": "sa@acme.test" }),
    )
    .await;
    srv.login(client, "sa@acme.test").await
}

/// A branch with its head logged in: `(branch_id, branch_head_token)`.
async fn branch(srv: &TestServer, client: &reqwest::Client, sa: &str, head_email: &str) -> (i64, String) {
    let created = srv
        .create(
            client,
            sa,
            json!({ "kind": "branch", "node_name": format!("Branch {head_email}"), "head_name": "Head", "head_email": head_email }),
        )
        .await;
    let branch_id = created["node_id"].as_i64().unwrap();
    (branch_id, srv.login(client, head_email).await)
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn validly_signed_token_for_missing_principal_is_rejected() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let token = mint_jwt(4242, "ghost@acme.test", "branch_head");
    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/subordinates"))
        .bearer_auth(&token)
        .json(&json!({ "kind": "department", "node_name": "Ops", "head_name": "D", "head_email": "d@x.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn created_department_head_logs_in_with_mailed_password() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let sa = super_admin(&srv, &client).await;
    let (_, bh) = branch(&srv, &client, &sa, "bh7@acme.test").await;

    let res = client
        .post(srv.url("/subordinates"))
        .bearer_auth(&bh)
        .json(&json!({ "kind": "department", "node_name": "Ops", "head_name": "Dana", "head_email": "d@x.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["role"], "department_head");
    assert_eq!(created["email"], "d@x.com");
    assert!(created.get("password").is_none());

    let password = srv.mailed_password("d@x.com").await;
    assert!(!created.to_string().contains(&password));

    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "email": "d@x.com", "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("set-cookie"));
    let tokens: Value = res.json().await.unwrap();
    assert_eq!(tokens["token_type"], "Bearer");
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let me: Value = res.json().await.unwrap();
    assert_eq!(me["email"], "d@x.com");
    assert_eq!(me["role"], "department_head");

    let res = client
        .post(srv.url("/auth/refresh"))
        .json(&json!({ "refresh_token": refresh }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn foreign_branch_head_cannot_replace_department_head() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let sa = super_admin(&srv, &client).await;
    let (_, bh7) = branch(&srv, &client, &sa, "bh7@acme.test").await;
    let (_, bh9) = branch(&srv, &client, &sa, "bh9@acme.test").await;

    let dept = srv
        .create(
            &client,
            &bh9,
            json!({ "kind": "department", "node_name": "Ops", "head_name": "Dana", "head_email": "d9@acme.test" }),
        )
        .await;
    let dept_id = dept["node_id"].as_i64().unwrap();

    let res = client
        .post(srv.url(&format!("/nodes/department/{dept_id}/head")))
        .bearer_auth(&bh7)
        .json(&json!({ "old_head_email": "d9@acme.test", "new_head_name": "Eve", "new_head_email": "eve@acme.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Nothing moved: the old head still logs in, the new one never existed.
    srv.login(&client, "d9@acme.test").await;
    assert!(srv.outbox.password_for("eve@acme.test").is_none());

    let res = client
        .get(srv.url(&format!("/nodes/department/{dept_id}/successions")))
        .bearer_auth(&bh9)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["items"].as_array().unwrap().is_empty());

    // The real owner can replace the head, leaving an audit row.
    let res = client
        .post(srv.url(&format!("/nodes/department/{dept_id}/head")))
        .bearer_auth(&bh9)
        .json(&json!({ "old_head_email": "d9@acme.test", "new_head_name": "Eve", "new_head_email": "eve@acme.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    srv.login(&client, "eve@acme.test").await;

    let res = client
        .get(srv.url(&format!("/nodes/department/{dept_id}/successions")))
        .bearer_auth(&bh9)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["email"], "d9@acme.test");
}

#[tokio::test]
async fn unknown_old_head_is_not_found_and_creates_nothing() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let sa = super_admin(&srv, &client).await;
    let (_, bh) = branch(&srv, &client, &sa, "bh@acme.test").await;
    let dept = srv
        .create(
            &client,
            &bh,
            json!({ "kind": "department", "node_name": "Ops", "head_name": "Dana", "head_email": "dana@acme.test" }),
        )
        .await;
    let dept_id = dept["node_id"].as_i64().unwrap();
    let mailed_before = srv.outbox.len();

    let res = client
        .post(srv.url(&format!("/nodes/department/{dept_id}/head")))
        .bearer_auth(&bh)
        .json(&json!({ "old_head_email": "nobody@acme.test", "new_head_name": "Eve", "new_head_email": "eve@acme.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(srv.outbox.len(), mailed_before);

    // The new email is not registered: it can still be provisioned.
    srv.create(
        &client,
        &bh,
        json!({ "kind": "warehouse", "node_name": "North", "head_name": "Eve", "head_email": "eve@acme.test" }),
    )
    .await;

    let res = client
        .get(srv.url(&format!("/nodes/department/{dept_id}/successions")))
        .bearer_auth(&bh)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn eleventh_login_is_rate_limited_and_lockout_holds() {
    let srv = TestServer::spawn(10).await;
    let client = reqwest::Client::new();

    for attempt in 1..=10u32 {
        let res = client
            .post(srv.url("/auth/login"))
            .json(&json!({ "email": COMPANY_EMAIL, "password": "Wrong-password-1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "attempt {attempt}");
        assert_eq!(res.headers()["x-ratelimit-limit"], "10");
        assert_eq!(
            res.headers()["x-ratelimit-remaining"].to_str().unwrap(),
            (10 - attempt).to_string()
        );
        let reset: u64 = res.headers()["x-ratelimit-reset"].to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&reset), "reset {reset}");
    }

    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "email": COMPANY_EMAIL, "password": "Wrong-password-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_limited");
    assert!(body["message"].as_str().unwrap().starts_with("too many requests, retry after"));

    // Correct credentials do not help while blocked.
    let password = srv.mailed_password(COMPANY_EMAIL).await;
    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "email": COMPANY_EMAIL, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for email in [COMPANY_EMAIL, "nobody@acme.test", "not-an-email"] {
        let res = client
            .post(srv.url("/auth/login"))
            .json(&json!({ "email": email, "password": "Wrong-password-1" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        bodies.push(res.json::<Value>().await.unwrap());
    }
    assert!(bodies.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(bodies[0]["message"], "invalid email or password");
}

#[tokio::test]
async fn listing_and_removal_follow_ownership() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let sa = super_admin(&srv, &client).await;
    let (_, bh) = branch(&srv, &client, &sa, "bh@acme.test").await;
    for name in ["Beta", "Alpha"] {
        srv.create(
            &client,
            &bh,
            json!({ "kind": "department", "node_name": name, "head_name": "H", "head_email": format!("{}@acme.test", name.to_lowercase()) }),
        )
        .await;
    }

    let res = client
        .get(srv.url("/subordinates/department?sort=name&order=asc&limit=1"))
        .bearer_auth(&bh)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "Alpha");
    let alpha_id = items[0]["id"].as_i64().unwrap();

    let res = client
        .get(srv.url("/subordinates/department?sort=password_hash"))
        .bearer_auth(&bh)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // The super admin owns branches, not departments.
    let res = client
        .delete(srv.url(&format!("/subordinates/department/{alpha_id}")))
        .bearer_auth(&sa)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .delete(srv.url(&format!("/subordinates/department/{alpha_id}")))
        .bearer_auth(&bh)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let removed: Value = res.json().await.unwrap();
    assert_eq!(removed["principals_removed"], 1);

    // The removed head's email is free again.
    srv.create(
        &client,
        &bh,
        json!({ "kind": "warehouse", "node_name": "W", "head_name": "H", "head_email": "alpha@acme.test" }),
    )
    .await;
}

#[tokio::test]
async fn component_records_units_in_its_own_ledger() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();

    let sa = super_admin(&srv, &client).await;
    let (_, bh) = branch(&srv, &client, &sa, "bh@acme.test").await;
    srv.create(
        &client,
        &bh,
        json!({ "kind": "warehouse", "node_name": "North", "head_name": "W", "head_email": "wh@acme.test" }),
    )
    .await;
    let wh = srv.login(&client, "wh@acme.test").await;
    srv.create(
        &client,
        &wh,
        json!({ "kind": "component", "head_name": "Rack 1", "head_email": "rack1@acme.test" }),
    )
    .await;
    let component = srv.login(&client, "rack1@acme.test").await;

    let res = client
        .post(srv.url("/units"))
        .bearer_auth(&component)
        .json(&json!({ "serial": "SN-001", "note": "first" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .post(srv.url("/units"))
        .bearer_auth(&component)
        .json(&json!({ "serial": "SN-001" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .get(srv.url("/units"))
        .bearer_auth(&component)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    // Only components keep a ledger.
    let res = client
        .post(srv.url("/units"))
        .bearer_auth(&wh)
        .json(&json!({ "serial": "SN-002" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_are_invalid_input() {
    let srv = TestServer::spawn(50).await;
    let client = reqwest::Client::new();
    let company = srv.login(&client, COMPANY_EMAIL).await;

    let res = client
        .post(srv.url("/subordinates"))
        .bearer_auth(&company)
        .json(&json!({ "kind": "emperor", "head_name": "X", "head_email": "x@acme.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_input");

    let res = client
        .post(srv.url("/subordinates"))
        .bearer_auth(&company)
        .json(&json!({ "kind": "organisation", "head_name": "X", "head_email": "not-an-email" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
