// ./api/src/main.rs
use axum::{
    Json,
    Router,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::get,
};
use std::collections::{HashMap, HashSet};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Import application layer components
use application::{
    ApplicationError, // Base error type
    CardService,
    CreateCardRequest,
    SearchCriteria,
    SearchService,
};
// Import domain types used directly in API (request bodies)
use domain::FieldValue;
// Import infrastructure layer implementations
use infrastructure::{JsonCardDocument, PersistentCardStore};

/// Shared application state handed to every handler.
#[derive(Clone)]
struct AppState {
    card_service: Arc<CardService>,
    search_service: Arc<SearchService>,
    /// Accepted `x-api-key` values. None disables authentication.
    api_keys: Option<Arc<HashSet<String>>>,
}

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CARDS_PATH: &str = "mtgCards.json";

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    // --- Configuration from environment ---
    let port = match env::var("PORT") {
        Ok(port_str) => match u16::from_str(&port_str) {
            Ok(port_num) => {
                info!("Using port {} from environment variable PORT.", port_num);
                port_num
            }
            Err(_) => {
                warn!(
                    "Invalid PORT value '{}' in environment variable. Using default port {}.",
                    port_str, DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        },
        Err(_) => {
            info!(
                "PORT environment variable not set. Using default port {}.",
                DEFAULT_PORT
            );
            DEFAULT_PORT
        }
    };

    let cards_path =
        env::var("CARDS_PATH").unwrap_or_else(|_| DEFAULT_CARDS_PATH.to_string());
    info!("Serving cards from document '{}'.", cards_path);

    let api_keys: Option<Arc<HashSet<String>>> = match env::var("API_KEYS") {
        Ok(raw) => {
            let keys: HashSet<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect();
            if keys.is_empty() {
                warn!("API_KEYS is set but contains no keys. Authentication is DISABLED.");
                None
            } else {
                info!("API key authentication enabled with {} key(s).", keys.len());
                Some(Arc::new(keys))
            }
        }
        Err(_) => {
            warn!("API_KEYS environment variable not set. Authentication is DISABLED.");
            None
        }
    };

    // --- Dependency Injection ---
    // 1. Create infrastructure components: the JSON document and the store over it
    let document = Arc::new(JsonCardDocument::new(&cards_path));
    let store = match PersistentCardStore::open(document).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to load card document '{}': {}", cards_path, e);
            std::process::exit(1);
        }
    };
    info!("Card store initialized.");

    // 2. Create application services, injecting dependencies
    let card_service = Arc::new(CardService::new(store.clone()));
    let search_service = Arc::new(SearchService::new(store));
    info!("Application services initialized.");

    // 3. Create the application state
    let app_state = AppState {
        card_service,
        search_service,
        api_keys,
    };

    // --- API Router Definition ---
    let app = Router::new()
        .route("/", get(welcome_handler))
        // Collection endpoints
        .route("/cards", get(list_cards_handler).post(create_card_handler))
        // Search endpoint (registered before the name route so "search" is not a card name)
        .route("/cards/search", get(search_cards_handler))
        // Single-card endpoints; PUT and PATCH are both upserts
        .route(
            "/cards/:name",
            get(get_card_handler)
                .put(upsert_card_handler)
                .patch(upsert_card_handler)
                .delete(delete_card_handler),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_api_key,
        ))
        .layer(middleware::from_fn(log_request))
        // Provide the application state to the handlers
        .with_state(app_state);

    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server starting on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

// --- Middleware ---

fn header_str<'a>(request: &'a Request, name: header::HeaderName) -> Option<&'a str> {
    request.headers().get(name).and_then(|value| value.to_str().ok())
}

/// Logs client IP, method, URI, and User-Agent for every incoming request.
async fn log_request(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let user_agent = header_str(&request, header::USER_AGENT)
        .unwrap_or("Unknown")
        .to_string();
    info!(
        client_ip = %addr.ip(),
        method = %request.method(),
        uri = %request.uri(),
        user_agent = %user_agent,
        "Incoming request"
    );
    next.run(request).await
}

/// Rejects requests whose `x-api-key` header is not in the configured set.
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(keys) = state.api_keys.as_deref() else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    match presented {
        Some(key) if keys.contains(key) => next.run(request).await,
        _ => {
            warn!(uri = %request.uri(), "Rejected request with missing or invalid API key");
            (
                StatusCode::UNAUTHORIZED,
                JsonResponse(serde_json::json!({"error": "Unauthorized"})),
            )
                .into_response()
        }
    }
}

// --- API Handlers ---

/// Handler for the root route (GET /).
async fn welcome_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> impl IntoResponse {
    let user_agent = header_str(&request, header::USER_AGENT).unwrap_or("Unknown");
    (
        StatusCode::OK,
        format!("Welcome {}, your ip is {}", user_agent, addr.ip()),
    )
}

/// Handler for listing all cards (GET /cards).
async fn list_cards_handler(State(state): State<AppState>) -> Response {
    match state.card_service.list_cards().await {
        Ok(entries) => (StatusCode::OK, JsonResponse(entries)).into_response(),
        Err(e) => {
            error!("Failed to list cards via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for adding a new card (POST /cards).
async fn create_card_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateCardRequest>,
) -> Response {
    match state.card_service.create_card(payload).await {
        Ok(name) => (
            StatusCode::CREATED,
            JsonResponse(serde_json::json!({
                "message": format!("{} has been added.", name)
            })),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to create card via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for retrieving one card (GET /cards/:name).
async fn get_card_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.card_service.get_card(&name).await {
        Ok(card) => (StatusCode::OK, JsonResponse(card)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for creating or overwriting one card (PUT/PATCH /cards/:name).
async fn upsert_card_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(fields): Json<HashMap<String, FieldValue>>,
) -> Response {
    match state.card_service.upsert_card(&name, fields).await {
        Ok(()) => (
            StatusCode::OK,
            JsonResponse(serde_json::json!({
                "message": format!("'{}' has been modified.", name)
            })),
        )
            .into_response(),
        Err(e) => {
            error!(card = %name, "Failed to upsert card via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for removing one card (DELETE /cards/:name).
async fn delete_card_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.card_service.delete_card(&name).await {
        Ok(()) => (StatusCode::NO_CONTENT, "").into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for searching cards (GET /cards/search?name=&type=&color=&keyword=).
async fn search_cards_handler(
    State(state): State<AppState>,
    Query(criteria): Query<SearchCriteria>,
) -> Response {
    match state.search_service.search(criteria).await {
        Ok(matches) => (StatusCode::OK, JsonResponse(matches)).into_response(),
        Err(e) => map_application_error_to_response(e),
    }
}

/// Helper function to map ApplicationError enum to HTTP status codes and response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, body) = match err {
        ApplicationError::NotFound(name) => (
            StatusCode::NOT_FOUND,
            format!("Card '{}' not found.", name),
        ),
        ApplicationError::AlreadyExists(name) => (
            StatusCode::CONFLICT,
            format!("Card '{}' already exists.", name),
        ),
        ApplicationError::NoMatches => (
            StatusCode::NOT_FOUND,
            "No cards found matching the search criteria.".to_string(),
        ),
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::Domain(domain_err) => {
            // Map domain validation errors to Bad Request
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
        ApplicationError::Document(msg) => {
            error!("Persisted card document is malformed: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "The card document could not be read".to_string(),
            )
        }
        ApplicationError::Io(io_err) => {
            error!("Persistence I/O failure: {}", io_err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    (
        status,
        JsonResponse(serde_json::json!({"error": body})),
    )
        .into_response()
}
