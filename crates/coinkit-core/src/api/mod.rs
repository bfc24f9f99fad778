//! REST API implementation
//!
//! Read access to the latest metrics, subscription management and a manual
//! cycle trigger.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;

use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::alerting::{AlertDispatcher, Engine};
use crate::db::Database;
use crate::error::Result;

/// HTTP API server
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        db: Database,
        engine: Option<Arc<Engine>>,
        dispatcher: Option<Arc<AlertDispatcher>>,
    ) -> Self {
        Self {
            state: AppState {
                db,
                engine,
                dispatcher,
            },
        }
    }

    /// Bind `addr` and serve until the listener fails
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = create_router(self.state)
            .layer(TraceLayer::new_for_http())
            .layer(cors);

        axum::serve(listener, app).await?;

        Ok(())
    }
}
