use std::env;
use std::sync::Arc;

use axum::{http::Method, routing::get, Router};
use dotenv::dotenv;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use maps_crawler::api::{self, AppState};
use maps_crawler::proxy::ProxyRotator;
use maps_crawler::runner::ScrapeSettings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let state = Arc::new(AppState {
        rotator: ProxyRotator::from_env()?,
        settings: ScrapeSettings::from_env(),
    });

    // Allow any origin so the dashboard can also be hosted elsewhere
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    let app = Router::new()
        .route("/api/scrape", get(api::scrape_stream))
        .nest_service("/", ServeDir::new("static")) // Serve dashboard
        .layer(cors)
        .with_state(state);

    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    println!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
