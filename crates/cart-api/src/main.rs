//! # ppp-cart
//!
//! Regional-pricing order engine with hosted checkout.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_PUBLISHABLE_KEY=pk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export BASE_URL=https://shop.example.com
//! export DATABASE_URL=sqlite://ppp-cart.db
//!
//! # Run the server (LOG_FORMAT=json for structured logs)
//! ppp-cart
//! ```

use cart_api::{
    routes,
    state::{AppConfig, AppState, LogFormat},
};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (reads .env first so LOG_FORMAT applies)
    let (pretty, json) = match AppConfig::from_env().log_format {
        LogFormat::Pretty => (Some(fmt::layer()), None),
        LogFormat::Json => (None, Some(fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(pretty)
        .with(json)
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    print_banner();

    let state = AppState::new().await?;
    let addr = state.config.socket_addr()?;
    let is_prod = state.config.is_production();

    info!("Environment: {}", state.config.environment);
    info!(
        products = state.reference.catalog.products.len(),
        shipping_methods = state.reference.shipping.methods.len(),
        countries = state.reference.countries.countries.len(),
        "Reference data loaded"
    );
    info!("Payment provider: {}", state.checkout.provider_name());
    info!("Order store: {}", state.config.store);

    if !is_prod {
        let webhook_url = format!(
            "{}{}",
            state.config.base_url.trim_end_matches('/'),
            state.gateway.webhook_path()
        );
        info!(
            "{}",
            cart_stripe::webhook_setup_instructions(&webhook_url)
        );
    }

    let app = routes::create_router(state);

    info!("ppp-cart starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ppp-cart
  ━━━━━━━━━━━━━━━━━━━━━━━
  Regional pricing order engine
  Version: {}

"#,
        env!("CARGO_PKG_VERSION")
    );
}
