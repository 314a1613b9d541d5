use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use crate::auth::{credential_from, AuthError, Identity, IdentityVerifier};
use crate::media::MediaError;
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Debug)]
struct Unauthorized(AuthError);
impl warp::reject::Reject for Unauthorized {}

#[derive(Debug)]
struct StoreRejection(StoreError);
impl warp::reject::Reject for StoreRejection {}

#[derive(Debug)]
struct MediaRejection(MediaError);
impl warp::reject::Reject for MediaRejection {}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn with_identity(
    verifier: Arc<dyn IdentityVerifier>,
) -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::query::<TokenQuery>())
        .and_then(move |header: Option<String>, query: TokenQuery| {
            let verifier = verifier.clone();
            async move {
                credential_from(header.as_deref(), query.token)
                    .and_then(|credential| verifier.verify(&credential))
                    .map_err(|e| {
                        log::debug!("Rejected credential: {}", e);
                        warp::reject::custom(Unauthorized(e))
                    })
            }
        })
}

pub fn routes(
    state: AppState,
    allowed_origins: &[String],
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    // Preflights from origins outside the list are refused by the cors
    // wrapper itself (403), after recovery has run.
    let cors = if allowed_origins.is_empty() {
        warp::cors().allow_any_origin()
    } else {
        warp::cors().allow_origins(allowed_origins.iter().map(String::as_str))
    }
    .allow_methods(vec!["GET", "POST"])
    .allow_headers(vec!["authorization", "content-type"])
    .allow_credentials(true);

    let root = warp::path::end()
        .and(warp::get())
        .map(|| "SocialX realtime core live");

    let uploads = warp::path("uploads").and(warp::fs::dir(state.media.storage_path().to_path_buf()));

    ws_route(state.clone())
        .or(history_route(state.clone()))
        .or(presence_route(state.clone()))
        .or(avatar_route(state))
        .or(uploads)
        .or(root)
        .recover(handle_rejection)
        .with(cors)
}

fn ws_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let server = state.server.clone();
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_identity(state.verifier))
        .map(move |ws: warp::ws::Ws, identity: Identity| {
            let server = server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket, identity).await;
            })
        })
}

fn history_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let store = state.store.clone();
    warp::path!("api" / "messages" / String)
        .and(warp::get())
        .and(with_identity(state.verifier))
        .and_then(move |peer: String, identity: Identity| {
            let store = store.clone();
            async move {
                let messages = store
                    .conversation(&identity, &Identity::from(peer))
                    .await
                    .map_err(|e| warp::reject::custom(StoreRejection(e)))?;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "messages": messages })))
            }
        })
}

fn presence_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let server = state.server.clone();
    warp::path!("api" / "presence")
        .and(warp::get())
        .and(with_identity(state.verifier))
        .and_then(move |_identity: Identity| {
            let server = server.clone();
            async move {
                let online = server.presence().online().await;
                Ok::<_, Rejection>(warp::reply::json(&json!({ "online": online })))
            }
        })
}

fn avatar_route(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let store = state.store.clone();
    let media = state.media.clone();
    warp::path!("api" / "upload" / "avatar")
        .and(warp::post())
        .and(with_identity(state.verifier))
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::content_length_limit(state.max_upload_bytes))
        .and(warp::body::bytes())
        .and_then(move |identity: Identity, content_type: Option<String>, body: Bytes| {
            let store = store.clone();
            let media = media.clone();
            async move {
                let stored = media
                    .store(content_type.as_deref(), &body)
                    .await
                    .map_err(|e| warp::reject::custom(MediaRejection(e)))?;
                store
                    .set_avatar(&identity, &stored.public_path)
                    .await
                    .map_err(|e| warp::reject::custom(StoreRejection(e)))?;
                log::info!("{} set avatar {}", identity, stored.public_path);
                Ok::<_, Rejection>(warp::reply::json(&json!({
                    "success": true,
                    "avatar": stored.public_path,
                })))
            }
        })
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(Unauthorized(e)) = err.find::<Unauthorized>() {
        (StatusCode::UNAUTHORIZED, e.to_string())
    } else if let Some(MediaRejection(e)) = err.find::<MediaRejection>() {
        let status = match e {
            MediaError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MediaError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MediaError::Empty | MediaError::UnsupportedType(_) => StatusCode::BAD_REQUEST,
        };
        (status, e.to_string())
    } else if let Some(StoreRejection(e)) = err.find::<StoreRejection>() {
        log::error!("Store failure while serving request: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "store unavailable".to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "upload too large".to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        log::debug!("Unhandled rejection: {:?}", err);
        (StatusCode::BAD_REQUEST, "bad request".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "message": message })),
        status,
    ))
}
