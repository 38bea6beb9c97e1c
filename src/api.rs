use std::sync::Arc;

use rocket::fs::{FileServer, Options};
use rocket::http::{ContentType, Status};
use rocket::response::content::RawText;
use rocket::response::status::Custom;
use rocket::response::stream::TextStream;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use tokio::sync::mpsc;

use crate::app_state::AppState;
use crate::prompt::{build_image_prompt, build_prompt, NEGATIVE_PROMPT};
use crate::registry::RegistrySnapshot;
use crate::relay::{self, spawn_timeout, DisconnectGuard, RelayBody, RelayJob, ResponseSink};
use crate::types::{ErrorResponse, HealthResponse};

/// Mounts every route plus the static directory on `rocket`.
pub fn build(rocket: Rocket<Build>, state: Arc<AppState>) -> Rocket<Build> {
    let static_dir = state.config.static_dir.clone();
    rocket
        .manage(state)
        .mount("/", routes![health, app, image, debug])
        .mount("/", FileServer::new(static_dir, Options::Index | Options::Missing))
}

/// Liveness plus the number of generations currently streaming.
#[get("/health")]
pub async fn health(state: &State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.registry.snapshot();
    Json(HealthResponse {
        status: "ok".to_string(),
        pending: snapshot.pending_count,
        issued: snapshot.issued_count,
    })
}

/// Streams a generated HTML page for `prompt`.
///
/// A too-short prompt gets a plain-text refusal. Once accepted the status is
/// always 200; failures only show up as a truncated body.
#[get("/app?<prompt>")]
pub async fn app(
    state: &State<Arc<AppState>>,
    prompt: Option<String>,
) -> Result<(ContentType, TextStream<RelayBody>), RawText<String>> {
    let prompt = prompt.unwrap_or_default();
    let min_length = state.config.min_prompt_length;

    // rejected before an id exists
    if prompt.chars().count() < min_length {
        return Err(RawText(format!(
            "prompt too short, please enter at least {min_length} characters"
        )));
    }

    let registry = state.registry.clone();
    let id = registry.issue();
    let cancel = registry.register(&id);
    tracing::info!(id = %id, prompt = %prompt, "accepted request");

    let (tx, rx) = mpsc::channel(64);
    let body = RelayBody::new(rx, DisconnectGuard::new(registry.clone(), id.clone()));

    spawn_timeout(
        registry.clone(),
        id.clone(),
        cancel.clone(),
        state.config.request_timeout,
    );

    let job = RelayJob {
        id,
        prompt: build_prompt(&prompt, &state.docs),
        cancel,
        params: state.config.generation_params(),
        end_marker: state.config.end_of_turn_marker.clone(),
    };
    tokio::spawn(relay::run(
        job,
        registry,
        state.text.clone(),
        ResponseSink::new(tx),
    ));

    Ok((ContentType::HTML, TextStream(body)))
}

/// Relays a caption to the text-to-image model. `prompt` wins over `caption`.
#[get("/image?<prompt>&<caption>")]
pub async fn image(
    state: &State<Arc<AppState>>,
    prompt: Option<String>,
    caption: Option<String>,
) -> Result<(ContentType, Vec<u8>), Custom<Json<ErrorResponse>>> {
    let caption = prompt.filter(|p| !p.trim().is_empty()).or(caption);
    let full_prompt = build_image_prompt(caption.as_deref());

    match state
        .images
        .generate(&full_prompt, &state.config.image_model, NEGATIVE_PROMPT)
        .await
    {
        Ok(image) => {
            let content_type =
                ContentType::parse_flexible(&image.content_type).unwrap_or(ContentType::Binary);
            Ok((content_type, image.bytes))
        }
        Err(e) => {
            tracing::warn!(error = %e, prompt = %full_prompt, "image generation failed");
            Err(Custom(
                Status::InternalServerError,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

#[get("/debug")]
pub async fn debug(state: &State<Arc<AppState>>) -> Json<RegistrySnapshot> {
    Json(state.registry.snapshot())
}
