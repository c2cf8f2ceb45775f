pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, patch, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use tower_http::trace::TraceLayer;

use config::Config;
use services::{Database, DerivationEngine, PaymentLedger};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: DerivationEngine<Database>,
    pub ledger: PaymentLedger<Database>,
    pub config: Config,
}

pub struct Application {
    host: String,
    port: u16,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        services::init_metrics();

        let db = Database::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;

        if config.database.run_migrations {
            db.run_migrations().await?;
        }

        let state = AppState {
            engine: DerivationEngine::new(db.clone()),
            ledger: PaymentLedger::new(db.clone()),
            db,
            config: config.clone(),
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            // Order endpoints (owner-scoped)
            .route(
                "/orders",
                post(handlers::orders::create_order).get(handlers::orders::list_orders),
            )
            .route("/orders/:id", get(handlers::orders::get_order))
            .route(
                "/orders/:id/status",
                patch(handlers::orders::update_order_status),
            )
            // Invoice endpoints
            .route(
                "/orders/:id/invoice",
                post(handlers::invoices::create_invoice),
            )
            .route("/invoices", get(handlers::invoices::list_invoices))
            .route(
                "/invoices/refresh-overdue",
                post(handlers::invoices::refresh_overdue),
            )
            .route("/invoices/:id", get(handlers::invoices::get_invoice))
            .route(
                "/invoices/:id/cancel",
                post(handlers::invoices::cancel_invoice),
            )
            // Payment endpoints
            .route(
                "/invoices/:id/payments",
                post(handlers::payments::record_payment).get(handlers::payments::list_payments),
            )
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        Ok(Self {
            host: config.server.host,
            port: config.server.port,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
