//! HTTP API for the quest engine
//!
//! The caller is identified by the `X-User-Id` header, set by the gateway
//! in front of this service. Requests without it get 401.
//!
//! ## Quest API
//! - `POST   /groups/{group}/quests` - Create a quest
//! - `GET    /groups/{group}/quests` - List quests (`?status=&limit=&offset=`)
//! - `GET    /groups/{group}/quests/{quest}` - Get a quest
//! - `PATCH  /groups/{group}/quests/{quest}` - Edit a quest (creator)
//! - `DELETE /groups/{group}/quests/{quest}` - Delete a quest (creator)
//!
//! ## Lifecycle API
//! - `POST /groups/{group}/quests/{quest}/join`
//! - `POST /groups/{group}/quests/{quest}/complete`
//! - `GET  /groups/{group}/quests/{quest}/participants`
//! - `POST /groups/{group}/quests/{quest}/participants/{user}/verify` (creator)
//! - `POST /groups/{group}/quests/{quest}/participants/{user}/settlement/retry` (creator)
//!
//! ## User API
//! - `PUT /users/me/wallet` - Register reward address
//! - `GET /users/{user}/achievements`
//! - `GET /users/{user}/activities?limit=`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "X-User-Id: carol" -H "Content-Type: application/json" \
//!      -d '{"title":"Summit","reward_amount":100,"category":"social","expires_at":"2030-01-01T00:00:00Z"}' \
//!      http://localhost:8095/groups/hikers/quests
//!
//! curl -X POST -H "X-User-Id: alice" http://localhost:8095/groups/hikers/quests/{id}/join
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::db::quests::{CreateQuestInput, QuestQuery, UpdateQuestInput};
use crate::error::QuestError;
use crate::services::response::{self, HandlerResult};
use crate::services::Services;

/// Header carrying the authenticated caller
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
struct WalletRequest {
    address: String,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr) -> Self {
        Self { services, bind_addr }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), QuestError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Collect the body and route
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(self
            .route(&parts.method, parts.uri.path(), parts.uri.query(), &parts.headers, body)
            .await)
    }

    /// Route a fully-read request to its handler
    pub async fn route(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        debug!(method = %method, path = %path, "Incoming request");

        if *method == Method::GET && path == "/health" {
            return self.handle_health().await.unwrap_or_else(response::error_response);
        }

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let result = match caller(headers) {
            Ok(actor) => self.dispatch(method, &segments, query, &actor, body).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(response::error_response)
    }

    async fn dispatch(
        &self,
        method: &Method,
        segments: &[&str],
        query: Option<&str>,
        actor: &str,
        body: Bytes,
    ) -> HandlerResult {
        let quests = &self.services.quests;

        match (method, segments) {
            // Quest API
            (&Method::POST, ["groups", group, "quests"]) => {
                let input: CreateQuestInput = parse_json(&body)?;
                let quest = quests.create_quest(group, actor, input).await?;
                Ok(response::created(&quest))
            }
            (&Method::GET, ["groups", group, "quests"]) => {
                let query = parse_quest_query(query)?;
                Ok(response::ok(&quests.list_quests(group, actor, query).await?))
            }
            (&Method::GET, ["groups", group, "quests", quest]) => {
                Ok(response::ok(&quests.get_quest(group, quest, actor).await?))
            }
            (&Method::PATCH, ["groups", group, "quests", quest]) => {
                let input: UpdateQuestInput = parse_json(&body)?;
                Ok(response::ok(&quests.update_quest(group, quest, actor, input).await?))
            }
            (&Method::DELETE, ["groups", group, "quests", quest]) => {
                quests.delete_quest(group, quest, actor).await?;
                Ok(response::no_content())
            }

            // Lifecycle API
            (&Method::POST, ["groups", group, "quests", quest, "join"]) => {
                Ok(response::created(&quests.join(group, quest, actor).await?))
            }
            (&Method::POST, ["groups", group, "quests", quest, "complete"]) => {
                Ok(response::ok(&quests.complete(group, quest, actor).await?))
            }
            (&Method::GET, ["groups", group, "quests", quest, "participants"]) => {
                Ok(response::ok(&quests.list_participants(group, quest, actor).await?))
            }
            (&Method::POST, ["groups", group, "quests", quest, "participants", user, "verify"]) => {
                Ok(response::ok(&quests.verify(group, quest, user, actor).await?))
            }
            (
                &Method::POST,
                ["groups", group, "quests", quest, "participants", user, "settlement", "retry"],
            ) => Ok(response::ok(
                &quests.retry_settlement(group, quest, user, actor).await?,
            )),

            // User API
            (&Method::PUT, ["users", "me", "wallet"]) => {
                let request: WalletRequest = parse_json(&body)?;
                Ok(response::ok(&quests.set_wallet(actor, &request.address).await?))
            }
            (&Method::GET, ["users", user, "achievements"]) => {
                Ok(response::ok(&quests.achievements(resolve_user(user, actor)).await?))
            }
            (&Method::GET, ["users", user, "activities"]) => {
                let limit = query_params(query)
                    .get("limit")
                    .map(|l| l.parse::<i64>())
                    .transpose()
                    .map_err(|_| QuestError::InvalidInput("limit must be an integer".into()))?
                    .unwrap_or(50);
                Ok(response::ok(&quests.activities(resolve_user(user, actor), limit).await?))
            }

            (_, ["groups", ..]) | (_, ["users", ..]) if is_known_path(segments) => {
                Ok(response::method_not_allowed())
            }
            _ => Ok(response::not_found("Not Found")),
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> HandlerResult {
        let stats = self.services.db.stats().await?;
        Ok(response::ok(&serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "quests": stats.quest_count,
            "participants": stats.participant_count,
            "achievements": stats.achievement_count,
        })))
    }
}

/// Authenticated caller from the identity header
fn caller(headers: &HeaderMap) -> Result<String, QuestError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(QuestError::Unauthenticated)
}

/// `me` in a user path stands for the caller
fn resolve_user<'a>(user: &'a str, actor: &'a str) -> &'a str {
    if user == "me" {
        actor
    } else {
        user
    }
}

fn is_known_path(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["groups", _, "quests"]
            | ["groups", _, "quests", _]
            | ["groups", _, "quests", _, "join" | "complete" | "participants"]
            | ["groups", _, "quests", _, "participants", _, "verify"]
            | ["groups", _, "quests", _, "participants", _, "settlement", "retry"]
            | ["users", "me", "wallet"]
            | ["users", _, "achievements" | "activities"]
    )
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, QuestError> {
    serde_json::from_slice(body).map_err(|e| QuestError::InvalidInput(format!("Invalid JSON body: {}", e)))
}

fn query_params(query: Option<&str>) -> HashMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn parse_quest_query(query: Option<&str>) -> Result<QuestQuery, QuestError> {
    let params = query_params(query);
    let mut parsed = QuestQuery {
        status: params.get("status").cloned(),
        ..Default::default()
    };

    if let Some(limit) = params.get("limit") {
        parsed.limit = limit
            .parse()
            .map_err(|_| QuestError::InvalidInput("limit must be an integer".into()))?;
    }
    if let Some(offset) = params.get("offset") {
        parsed.offset = offset
            .parse()
            .map_err(|_| QuestError::InvalidInput("offset must be an integer".into()))?;
    }

    Ok(parsed)
}
