//! Webhook HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use hyper::Server;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::datastore::Datastore;
use crate::error::{Result, WeaverError};
use crate::fetch::MediaFetcher;
use crate::messenger::PlatformClient;
use crate::models::facebook;
use crate::prompts::PromptCounter;
use crate::{identity, ingest};

const PRIVACY_POLICY_HTML: &str = include_str!("privacy_policy.html");

const NO_ATTACHMENT_REPLY: &str =
    "Send me a voice note and I will add it to the archive.";

/// Everything a request handler needs, wired once at startup.
pub struct AppContext {
    pub config: Config,
    pub datastore: Datastore,
    pub prompts: PromptCounter,
    pub platform: Arc<dyn PlatformClient>,
    pub fetcher: Arc<dyn MediaFetcher>,
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdminParams {
    secret: Option<String>,
}

/// Create the HTTP server with all routes.
pub fn create_app(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/webhook", get(verify_webhook).post(receive_event))
        .route("/users", get(list_users))
        .route("/privacy-policy", get(privacy_policy))
        .layer(Extension(ctx))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server on the specified port.
pub async fn start_server(ctx: Arc<AppContext>, port: u16) -> anyhow::Result<()> {
    let app = create_app(ctx);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 Webhook server running on http://localhost:{port}");
    println!("🔏 Privacy policy:  http://localhost:{port}/privacy-policy");

    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

/// Subscription verification challenge.
async fn verify_webhook(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    if params.mode.as_deref() == Some("subscribe")
        && params.verify_token.as_deref() == Some(ctx.config.verify_token.as_str())
    {
        let challenge = params.challenge.unwrap_or_else(|| "errored".to_string());
        // Echo the challenge back, keeping a numeric challenge numeric.
        let body = match challenge.parse::<i64>() {
            Ok(number) => json!(number),
            Err(_) => json!(challenge),
        };
        info!(challenge = %challenge, "verified webhook subscription");
        return Json(body).into_response();
    }
    error!(
        given = params.verify_token.as_deref().unwrap_or(""),
        "invalid webhook verification request"
    );
    (
        StatusCode::UNAUTHORIZED,
        "Invalid Request or Verification Token",
    )
        .into_response()
}

/// Inbound webhook event: resolve the sender, archive the attachment, reply.
async fn receive_event(
    Extension(ctx): Extension<Arc<AppContext>>,
    payload: std::result::Result<Json<facebook::Event>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            error!(error = %rejection, "rejected malformed webhook body");
            return diagnostic(StatusCode::UNPROCESSABLE_ENTITY, &rejection.to_string());
        }
    };

    match handle_event(&ctx, &event).await {
        Ok(()) => (StatusCode::OK, Json(json!("Success!"))).into_response(),
        Err(e) => {
            error!(error = %e, "webhook event handling failed");
            error_response(&e)
        }
    }
}

async fn handle_event(ctx: &AppContext, event: &facebook::Event) -> Result<()> {
    event.validate()?;
    let Some(record) = event
        .entry
        .first()
        .and_then(|entry| entry.messaging.first())
    else {
        return Err(WeaverError::Input(
            "event carries no messaging record".into(),
        ));
    };

    let sender = record.sender.id.as_str();
    let user_id =
        identity::resolve_or_register(&ctx.datastore, ctx.platform.as_ref(), sender).await?;

    let answer = if record.message.attachments.is_empty() {
        NO_ATTACHMENT_REPLY.to_string()
    } else {
        match ingest::ingest(
            &ctx.datastore,
            &ctx.prompts,
            ctx.fetcher.as_ref(),
            &user_id,
            &record.message,
        )
        .await
        {
            Ok(stored) => format!("Archived your voice note as {stored}."),
            Err(e) => {
                // Tell the sender what went wrong, then surface the error.
                let _ = ctx.platform.send_text(sender, &user_facing(&e)).await;
                return Err(e);
            }
        }
    };
    ctx.platform.send_text(sender, &answer).await?;
    Ok(())
}

/// Admin-only listing of every registered user.
async fn list_users(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(params): Query<AdminParams>,
) -> Response {
    let authorized = matches!(
        (&ctx.config.admin_secret, &params.secret),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            "Admin secret needed for this operation",
        )
            .into_response();
    }
    match ctx.datastore.get_users().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => {
            error!(error = %e, "user listing failed");
            error_response(&e)
        }
    }
}

async fn privacy_policy() -> Html<&'static str> {
    Html(PRIVACY_POLICY_HTML)
}

fn error_response(error: &WeaverError) -> Response {
    match error {
        WeaverError::Input(_) | WeaverError::Validation(_) => {
            diagnostic(StatusCode::UNPROCESSABLE_ENTITY, &error.to_string())
        }
        WeaverError::Duplicated(_) => {
            (StatusCode::CONFLICT, "Username is unavailable").into_response()
        }
        WeaverError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
        WeaverError::Upstream(_) => diagnostic(StatusCode::BAD_GATEWAY, &error.to_string()),
        _ => diagnostic(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string()),
    }
}

fn diagnostic(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "status_code": status.as_u16(),
        "message": message,
        "data": null,
    });
    (status, Json(body)).into_response()
}

fn user_facing(error: &WeaverError) -> String {
    match error {
        WeaverError::Input(reason) => format!("I couldn't archive that: {reason}."),
        WeaverError::Duplicated(_) => "I already have that voice note archived.".to_string(),
        WeaverError::Upstream(_) => {
            "I couldn't download that voice note. Please try again.".to_string()
        }
        _ => "Something went wrong on my end. Please try again later.".to_string(),
    }
}
