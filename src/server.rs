// src/server.rs
//! warp routes over [`DataService`].

use chrono::Utc;
use serde::Serialize;
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::warn;
use warp::{
    http::StatusCode,
    reply::{self, Reply, Response},
    Filter, Rejection,
};

use crate::error::{Error, Result};
use crate::service::{AdminAction, DataService};

const DEMO_PAGE: &str = include_str!("demo.html");
const TOKEN_HEADER: &str = "x-admin-token";

type Query = HashMap<String, String>;

fn json_with_status<T: Serialize>(body: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(body), status).into_response()
}

fn error_reply(err: &Error) -> Response {
    let status = match err {
        Error::Unsupported(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_with_status(
        &serde_json::json!({ "error": err.to_string(), "kind": err.kind() }),
        status,
    )
}

fn dataset_reply<T: Serialize>(result: Result<Arc<T>>) -> Response {
    match result {
        Ok(value) => reply::json(&*value).into_response(),
        Err(e) => error_reply(&e),
    }
}

/// Missing or unparsable means true.
pub fn parse_only_matched(raw: Option<&str>) -> bool {
    match raw.map(|s| s.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => false,
        _ => true,
    }
}

/// Constant-time comparison against the configured token; no token configured allows all.
fn authorized(expected: Option<&str>, query: &Query, header: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let given = query.get("token").map(String::as_str).or(header);
    match given {
        Some(given) if given.len() == expected.len() => given
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0,
        _ => false,
    }
}

async fn health() -> Result<Response, Infallible> {
    Ok(reply::json(&serde_json::json!({ "ok": true, "time": Utc::now().to_rfc3339() }))
        .into_response())
}

async fn stats(service: Arc<DataService>) -> Result<Response, Infallible> {
    Ok(reply::json(&service.stats()).into_response())
}

async fn profile(service: Arc<DataService>) -> Result<Response, Infallible> {
    Ok(dataset_reply(service.profile().await))
}

async fn performance(service: Arc<DataService>) -> Result<Response, Infallible> {
    Ok(dataset_reply(service.performance().await))
}

async fn performance_key(service: Arc<DataService>) -> Result<Response, Infallible> {
    Ok(dataset_reply(service.performance_key().await))
}

async fn schools(query: Query, service: Arc<DataService>) -> Result<Response, Infallible> {
    let only_matched = parse_only_matched(query.get("onlyMatched").map(String::as_str));
    Ok(dataset_reply(service.schools(only_matched).await))
}

async fn status(service: Arc<DataService>) -> Result<Response, Infallible> {
    Ok(match service.status() {
        Ok(report) => reply::json(&report).into_response(),
        Err(e) => error_reply(&e),
    })
}

async fn admin(
    action: AdminAction,
    query: Query,
    header: Option<String>,
    service: Arc<DataService>,
    token: Arc<Option<String>>,
) -> Result<Response, Infallible> {
    if !authorized(token.as_deref(), &query, header.as_deref()) {
        warn!(?action, "rejected admin request");
        return Ok(json_with_status(
            &serde_json::json!({ "ok": false, "error": "unauthorized" }),
            StatusCode::UNAUTHORIZED,
        ));
    }
    let action = match action {
        AdminAction::Refresh { .. } => AdminAction::Refresh {
            reason: query
                .get("reason")
                .cloned()
                .unwrap_or_else(|| "manual".to_string()),
        },
        other => other,
    };
    Ok(match service.execute(action).await {
        Ok(outcome) => reply::json(&outcome).into_response(),
        // storage failures are reported, not raised
        Err(e @ Error::Persistence(_)) => reply::json(
            &serde_json::json!({ "ok": false, "error": e.to_string() }),
        )
        .into_response(),
        Err(e) => json_with_status(
            &serde_json::json!({ "ok": false, "error": e.to_string(), "kind": e.kind() }),
            match e {
                Error::Unsupported(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        ),
    })
}

/// Every route, with CORS and request tracing applied.
pub fn routes(
    service: Arc<DataService>,
    admin_token: Option<String>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_service = {
        let service = service.clone();
        warp::any().map(move || service.clone())
    };
    let token = Arc::new(admin_token);
    let with_token = warp::any().map(move || token.clone());

    let index = warp::path::end()
        .and(warp::get())
        .map(|| reply::html(DEMO_PAGE));
    let health = warp::path!("health").and(warp::get()).and_then(health);
    let stats = warp::path!("stats")
        .and(warp::get())
        .and(with_service.clone())
        .and_then(stats);
    let profile = warp::path!("api" / "profile")
        .and(warp::get())
        .and(with_service.clone())
        .and_then(profile);
    let performance = warp::path!("api" / "performance")
        .and(warp::get())
        .and(with_service.clone())
        .and_then(performance);
    let performance_key = warp::path!("api" / "performance" / "key")
        .and(warp::get())
        .and(with_service.clone())
        .and_then(performance_key);
    let schools = warp::path!("api" / "schools")
        .and(warp::get())
        .and(warp::query::<Query>())
        .and(with_service.clone())
        .and_then(schools);
    let status = warp::path!("admin" / "status")
        .and(warp::get())
        .and(with_service.clone())
        .and_then(status);

    let admin_action = |action: AdminAction| warp::any().map(move || action.clone());
    let admin_common = warp::query::<Query>()
        .and(warp::header::optional::<String>(TOKEN_HEADER))
        .and(with_service.clone())
        .and(with_token.clone());

    let refresh = warp::path!("admin" / "refresh")
        .and(warp::get().or(warp::post()).unify())
        .and(admin_action(AdminAction::Refresh {
            reason: String::new(),
        }))
        .and(admin_common.clone())
        .and_then(admin);
    let save = warp::path!("admin" / "save")
        .and(warp::post())
        .and(admin_action(AdminAction::Save))
        .and(admin_common.clone())
        .and_then(admin);
    let load = warp::path!("admin" / "load")
        .and(warp::post())
        .and(admin_action(AdminAction::Load))
        .and(admin_common.clone())
        .and_then(admin);
    let clear = warp::path!("admin" / "clear")
        .and(warp::post())
        .and(admin_action(AdminAction::Clear))
        .and(admin_common)
        .and_then(admin);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type", TOKEN_HEADER]);

    index
        .or(health)
        .or(stats)
        .or(profile)
        .or(performance)
        .or(performance_key)
        .or(schools)
        .or(status)
        .or(refresh)
        .or(save)
        .or(load)
        .or(clear)
        .with(cors)
        .with(warp::trace::request())
}
