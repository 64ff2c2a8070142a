pub mod events;
pub mod packing;
pub mod public;
pub mod trips;
pub mod user;

use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use tower_http::trace::TraceLayer;

use crate::{error::AppError, state::AppState};

/// JSON request body whose rejections render as `AppError`.
pub(crate) type JsonBody<T> = WithRejection<Json<T>, AppError>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/me", user::router())
        .merge(trips::router())
        .merge(packing::router())
        .merge(events::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_stream::StreamExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, db::test_pool};

    async fn app() -> Router {
        let state = AppState::new(AppConfig::for_database("sqlite::memory:"), test_pool().await);
        create_router(state)
    }

    struct Reply {
        status: StatusCode,
        cookie: Option<String>,
        body: Value,
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            cookie,
            body,
        }
    }

    async fn signup(app: &Router, username: &str) -> String {
        let reply = call(
            app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "username": username, "password": "secret1" })),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        reply.cookie.expect("session cookie")
    }

    #[tokio::test]
    async fn signup_rules_and_session_cookie() {
        let app = app().await;
        let short_name = call(
            &app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "username": "a", "password": "secret1" })),
        )
        .await;
        assert_eq!(short_name.status, StatusCode::BAD_REQUEST);

        let short_pass = call(
            &app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "username": "alice", "password": "123" })),
        )
        .await;
        assert_eq!(short_pass.status, StatusCode::BAD_REQUEST);

        let ok = call(
            &app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "username": "alice", "password": "secret1" })),
        )
        .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.body["user"]["username"], "alice");
        let cookie = ok.cookie.unwrap();
        assert!(cookie.starts_with("trippack_session="));
        // Private cookies are encrypted; the raw token never shows.
        assert!(!cookie.contains(ok.body["user"]["id"].as_str().unwrap()));

        let taken = call(
            &app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "username": "alice", "password": "secret1" })),
        )
        .await;
        assert_eq!(taken.status, StatusCode::BAD_REQUEST);

        let me = call(&app, "GET", "/me", Some(&cookie), None).await;
        assert_eq!(me.status, StatusCode::OK);
        assert_eq!(me.body["username"], "alice");
    }

    #[tokio::test]
    async fn login_and_logout() {
        let app = app().await;
        signup(&app, "alice").await;

        let bad = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "nope-nope" })),
        )
        .await;
        assert_eq!(bad.status, StatusCode::UNAUTHORIZED);

        let good = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "secret1" })),
        )
        .await;
        assert_eq!(good.status, StatusCode::OK);
        let cookie = good.cookie.unwrap();

        let out = call(&app, "POST", "/auth/logout", Some(&cookie), None).await;
        assert_eq!(out.status, StatusCode::OK);

        // The token is revoked server-side, so replaying the cookie fails.
        let replay = call(&app, "GET", "/me", Some(&cookie), None).await;
        assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthorized() {
        let app = app().await;
        for (method, uri) in [
            ("GET", "/trips/discover"),
            ("GET", "/me"),
            ("DELETE", "/trip/some-id"),
            ("GET", "/trip/some-id/folders"),
        ] {
            let reply = call(&app, method, uri, None, None).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
        let join = call(
            &app,
            "POST",
            "/trip/join",
            None,
            Some(json!({ "tripId": "x" })),
        )
        .await;
        assert_eq!(join.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn join_approve_and_collaborate() {
        let app = app().await;
        let owner = signup(&app, "olivia").await;
        let alice = signup(&app, "alice").await;

        let created = call(
            &app,
            "POST",
            "/trips",
            Some(&owner),
            Some(json!({ "name": "Iceland", "auto_approve_members": false })),
        )
        .await;
        assert_eq!(created.status, StatusCode::OK);
        let trip_id = created.body["id"].as_str().unwrap().to_string();

        let missing = call(&app, "POST", "/trip/join", Some(&alice), Some(json!({}))).await;
        assert_eq!(missing.status, StatusCode::BAD_REQUEST);
        let unknown = call(
            &app,
            "POST",
            "/trip/join",
            Some(&alice),
            Some(json!({ "tripId": "nope" })),
        )
        .await;
        assert_eq!(unknown.status, StatusCode::NOT_FOUND);

        let joined = call(
            &app,
            "POST",
            "/trip/join",
            Some(&alice),
            Some(json!({ "tripId": trip_id })),
        )
        .await;
        assert_eq!(joined.status, StatusCode::OK);
        assert_eq!(joined.body["status"], "pending");

        let again = call(
            &app,
            "POST",
            "/trip/join",
            Some(&alice),
            Some(json!({ "tripId": trip_id })),
        )
        .await;
        assert_eq!(again.status, StatusCode::CONFLICT);

        let folders_uri = format!("/trip/{trip_id}/folders");
        let blocked = call(&app, "GET", &folders_uri, Some(&alice), None).await;
        assert_eq!(blocked.status, StatusCode::UNAUTHORIZED);

        let members = call(
            &app,
            "GET",
            &format!("/trip/{trip_id}/members"),
            Some(&owner),
            None,
        )
        .await;
        let membership_id = members.body["pending"][0]["id"].as_str().unwrap().to_string();

        let approved = call(
            &app,
            "POST",
            &format!("/trip/{trip_id}/members/{membership_id}/approve"),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(approved.status, StatusCode::OK);

        let nameless = call(&app, "POST", &folders_uri, Some(&alice), Some(json!({}))).await;
        assert_eq!(nameless.status, StatusCode::BAD_REQUEST);
        let folder = call(
            &app,
            "POST",
            &folders_uri,
            Some(&alice),
            Some(json!({ "name": "Gear" })),
        )
        .await;
        assert_eq!(folder.status, StatusCode::OK);

        let task = call(
            &app,
            "POST",
            &format!("/trip/{trip_id}/tasks"),
            Some(&alice),
            Some(json!({ "text": "Passport", "folder_id": folder.body["id"], "deadline": "" })),
        )
        .await;
        assert_eq!(task.status, StatusCode::OK);
        assert_eq!(task.body["creator_name"], "alice");
        let task_id = task.body["id"].as_str().unwrap().to_string();

        let packed = call(
            &app,
            "POST",
            &format!("/task/{task_id}/packed"),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(packed.body["packed"], true);

        let progress = call(
            &app,
            "GET",
            &format!("/trip/{trip_id}/progress"),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(progress.body["progress"], 1.0);

        let not_creator = call(
            &app,
            "DELETE",
            &format!("/task/{task_id}"),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(not_creator.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn only_the_owner_changes_or_deletes_a_trip() {
        let app = app().await;
        let owner = signup(&app, "olivia").await;
        let other = signup(&app, "mallory").await;

        let created = call(
            &app,
            "POST",
            "/trips",
            Some(&owner),
            Some(json!({ "name": "Rome" })),
        )
        .await;
        let trip_uri = format!("/trip/{}", created.body["id"].as_str().unwrap());

        let forbidden = call(
            &app,
            "PUT",
            &trip_uri,
            Some(&other),
            Some(json!({ "name": "Mine now" })),
        )
        .await;
        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);

        let missing = call(
            &app,
            "PUT",
            "/trip/does-not-exist",
            Some(&owner),
            Some(json!({ "name": "Nope" })),
        )
        .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let renamed = call(
            &app,
            "PUT",
            &trip_uri,
            Some(&owner),
            Some(json!({ "name": "Roma", "is_public": false })),
        )
        .await;
        assert_eq!(renamed.status, StatusCode::OK);
        assert_eq!(renamed.body["name"], "Roma");

        assert_eq!(
            call(&app, "DELETE", &trip_uri, Some(&other), None).await.status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            call(&app, "DELETE", &trip_uri, Some(&owner), None).await.status,
            StatusCode::OK
        );
        assert_eq!(
            call(&app, "GET", &trip_uri, Some(&owner), None).await.status,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn invite_code_joins_private_trips() {
        let app = app().await;
        let owner = signup(&app, "olivia").await;
        let bob = signup(&app, "bob").await;

        let created = call(
            &app,
            "POST",
            "/trips",
            Some(&owner),
            Some(json!({ "name": "Secret", "is_public": false, "auto_approve_members": true })),
        )
        .await;
        let code = created.body["invite_code"].as_str().unwrap().to_string();

        let discover = call(&app, "GET", "/trips/discover", Some(&bob), None).await;
        assert_eq!(discover.body.as_array().map(Vec::len), Some(0));

        let preview = call(&app, "GET", &format!("/join/{code}"), Some(&bob), None).await;
        assert_eq!(preview.status, StatusCode::OK);
        assert_eq!(preview.body["membership_status"], "none");

        let joined = call(&app, "POST", &format!("/join/{code}"), Some(&bob), None).await;
        assert_eq!(joined.body["status"], "approved");

        let mine = call(&app, "GET", "/me/trips", Some(&bob), None).await;
        assert_eq!(mine.body[0]["name"], "Secret");
        assert_eq!(mine.body[0]["member_count"], 2);

        let unknown = call(&app, "GET", "/join/bogus", Some(&bob), None).await;
        assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn login_is_checked_before_the_body() {
        let app = app().await;
        for (method, uri) in [
            ("PUT", "/trip/x"),
            ("POST", "/trip/join"),
            ("POST", "/trip/x/folders"),
            ("POST", "/trips"),
            ("PUT", "/me"),
            ("PUT", "/task/x"),
        ] {
            let reply = call(&app, method, uri, None, None).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(reply.body["error"], "unauthorized", "{method} {uri}");
        }

        let mistyped = call(
            &app,
            "POST",
            "/trip/join",
            None,
            Some(json!({ "tripId": 5 })),
        )
        .await;
        assert_eq!(mistyped.status, StatusCode::UNAUTHORIZED);
        assert_eq!(mistyped.body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn unreadable_bodies_are_json_bad_requests() {
        let app = app().await;
        let alice = signup(&app, "alice").await;

        let mistyped = call(
            &app,
            "POST",
            "/trip/join",
            Some(&alice),
            Some(json!({ "tripId": 5 })),
        )
        .await;
        assert_eq!(mistyped.status, StatusCode::BAD_REQUEST);
        assert!(mistyped.body["error"].is_string());

        let bodyless = call(&app, "POST", "/trips", Some(&alice), None).await;
        assert_eq!(bodyless.status, StatusCode::BAD_REQUEST);
        assert!(bodyless.body["error"].is_string());

        let signup_without_body = call(&app, "POST", "/auth/signup", None, None).await;
        assert_eq!(signup_without_body.status, StatusCode::BAD_REQUEST);
        assert!(signup_without_body.body["error"].is_string());
    }

    #[tokio::test]
    async fn folder_access_is_checked_before_the_name() {
        let app = app().await;
        let owner = signup(&app, "olivia").await;
        let stranger = signup(&app, "sam").await;
        let created = call(
            &app,
            "POST",
            "/trips",
            Some(&owner),
            Some(json!({ "name": "Iceland" })),
        )
        .await;
        let folders_uri = format!("/trip/{}/folders", created.body["id"].as_str().unwrap());

        for body in [json!({}), json!({ "name": "" }), json!({ "name": "Gear" })] {
            let reply = call(&app, "POST", &folders_uri, Some(&stranger), Some(body)).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        }
        for body in [json!({}), json!({ "name": "  " })] {
            let reply = call(&app, "POST", &folders_uri, Some(&owner), Some(body)).await;
            assert_eq!(reply.status, StatusCode::BAD_REQUEST);
            assert_eq!(reply.body["error"], "Folder name is required");
        }
    }

    #[tokio::test]
    async fn only_the_owner_learns_whether_a_membership_exists() {
        let app = app().await;
        let owner = signup(&app, "olivia").await;
        let alice = signup(&app, "alice").await;
        let mallory = signup(&app, "mallory").await;
        let created = call(
            &app,
            "POST",
            "/trips",
            Some(&owner),
            Some(json!({ "name": "Iceland" })),
        )
        .await;
        let trip_id = created.body["id"].as_str().unwrap().to_string();
        call(
            &app,
            "POST",
            "/trip/join",
            Some(&alice),
            Some(json!({ "tripId": trip_id })),
        )
        .await;
        let members = call(
            &app,
            "GET",
            &format!("/trip/{trip_id}/members"),
            Some(&owner),
            None,
        )
        .await;
        let membership_id = members.body["pending"][0]["id"].as_str().unwrap().to_string();

        for id in [membership_id.as_str(), "missing"] {
            let reply = call(
                &app,
                "DELETE",
                &format!("/trip/{trip_id}/members/{id}"),
                Some(&mallory),
                None,
            )
            .await;
            assert_eq!(reply.status, StatusCode::FORBIDDEN);
        }
        let missing = call(
            &app,
            "DELETE",
            &format!("/trip/{trip_id}/members/missing"),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        let rejected = call(
            &app,
            "DELETE",
            &format!("/trip/{trip_id}/members/{membership_id}"),
            Some(&owner),
            None,
        )
        .await;
        assert_eq!(rejected.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn change_feed_requires_access_and_streams_events() {
        let app = app().await;
        let owner = signup(&app, "olivia").await;
        let alice = signup(&app, "alice").await;
        let created = call(
            &app,
            "POST",
            "/trips",
            Some(&owner),
            Some(json!({ "name": "Iceland", "auto_approve_members": false })),
        )
        .await;
        let trip_id = created.body["id"].as_str().unwrap().to_string();
        let events_uri = format!("/trip/{trip_id}/events");

        let anonymous = call(&app, "GET", &events_uri, None, None).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

        call(
            &app,
            "POST",
            "/trip/join",
            Some(&alice),
            Some(json!({ "tripId": trip_id })),
        )
        .await;
        let pending = call(&app, "GET", &events_uri, Some(&alice), None).await;
        assert_eq!(pending.status, StatusCode::UNAUTHORIZED);

        let members = call(
            &app,
            "GET",
            &format!("/trip/{trip_id}/members"),
            Some(&owner),
            None,
        )
        .await;
        let membership_id = members.body["pending"][0]["id"].as_str().unwrap().to_string();
        call(
            &app,
            "POST",
            &format!("/trip/{trip_id}/members/{membership_id}/approve"),
            Some(&owner),
            None,
        )
        .await;

        let request = Request::builder()
            .uri(&events_uri)
            .header(header::COOKIE, &alice)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"), "{content_type}");

        let mut frames = response.into_body().into_data_stream();
        let added = call(
            &app,
            "POST",
            &format!("/trip/{trip_id}/tasks"),
            Some(&owner),
            Some(json!({ "text": "Passport" })),
        )
        .await;
        assert_eq!(added.status, StatusCode::OK);

        let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .expect("event before timeout")
            .expect("stream open")
            .expect("frame");
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: tasks_changed"), "{text}");
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("data line");
        let payload: Value = serde_json::from_str(data).unwrap();
        assert_eq!(payload["trip_id"], trip_id.as_str());
        assert_eq!(payload["kind"], "tasks_changed");
    }
}
