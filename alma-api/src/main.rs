use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod config;
mod models;
mod routes;
mod schema;
mod services;
mod socket;

use alma_shared::clients::email::{EmailClient, Notifier};
use alma_shared::clients::redis::RedisClient;
use alma_shared::middleware::SessionLayer;
use alma_shared::session::{RedisSessionStore, SessionStore};
use config::AppConfig;
use socket::groups::DeliveryGroups;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub redis: RedisClient,
    pub sessions: Arc<dyn SessionStore>,
    pub mailer: Arc<dyn Notifier>,
    pub groups: DeliveryGroups,
    pub io: SocketIo,
}

impl AppState {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_ttl_secs)
    }
}

impl FromRef<AppState> for SessionLayer {
    fn from_ref(state: &AppState) -> Self {
        SessionLayer {
            store: state.sessions.clone(),
            ttl: state.session_ttl(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    alma_shared::middleware::init_tracing("alma-api");

    let config = AppConfig::load()?;
    let port = config.port;

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let db = Pool::builder().max_size(10).build(manager)?;

    let redis = RedisClient::connect(&config.redis_url).await?;
    let sessions: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis.clone()));
    let mailer: Arc<dyn Notifier> =
        Arc::new(EmailClient::new(&config.resend_api_key, &config.from_email, "alma"));

    // Socket.IO layer - io lives in AppState so message fan-out can reach
    // individual sockets from anywhere.
    let (sio_layer, io) = SocketIo::builder().build_layer();

    let cors_origin = config.cors_origin.parse::<HeaderValue>()?;

    let state = Arc::new(AppState {
        db,
        config,
        redis,
        sessions,
        mailer,
        groups: DeliveryGroups::new(),
        io: io.clone(),
    });

    io.ns("/", {
        let state = state.clone();
        move |socket: socketioxide::extract::SocketRef| {
            let state = state.clone();
            async move {
                socket::handlers::on_connect_with_state(socket, state).await;
            }
        }
    });

    // Cookies cross the wire, so the CORS layer names one origin and allows
    // credentials instead of going permissive.
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    let app = Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        // Auth
        .route("/auth/login", post(routes::login::initiate_login))
        .route("/auth/resend", post(routes::resend::resend_code))
        .route("/auth/verify", post(routes::verify::verify))
        .route("/auth/google", post(routes::oauth::google_oauth))
        .route("/auth/onboarding", get(routes::onboarding::onboarding_details))
        .route("/auth/username-available", get(routes::onboarding::username_available))
        .route("/auth/profile", post(routes::onboarding::create_profile))
        .route("/auth/logout", post(routes::logout::logout))
        .route("/auth/me", get(routes::me::me))
        // Conversations
        .route("/conversations", get(routes::conversations::list_conversations))
        .route("/conversations/:id/messages", get(routes::conversations::list_messages))
        .layer(sio_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "alma-api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
