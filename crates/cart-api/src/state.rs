//! # Application State
//!
//! Shared state for the Axum application.
//! Contains the order services, reference data and configuration.

use cart_core::{
    AdminService, BoxedPaymentStrategy, CheckoutService, CheckoutUrls, InMemoryOrderStore,
    OrderBuilder, ReferenceData, SharedOrderStore, SqliteOrderStore, WebhookProcessor,
};
use cart_stripe::StripeCheckoutStrategy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default database when `DATABASE_URL` is unset
pub const DEFAULT_DATABASE_URL: &str = "sqlite://ppp-cart.db";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Where orders are persisted, chosen by `ORDER_STORE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// SQLite database at a sqlx URL (the default)
    Sqlite { url: String },
    /// Process memory; everything is lost on restart
    Memory,
    /// Unrecognized `ORDER_STORE` value, rejected at startup
    Unsupported(String),
}

impl StoreBackend {
    fn parse(kind: Option<&str>, database_url: Option<String>) -> Self {
        match kind.map(str::trim) {
            None | Some("") | Some("sqlite") => StoreBackend::Sqlite {
                url: database_url.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => StoreBackend::Unsupported(other.to_string()),
        }
    }

    /// Open the configured store, applying the schema for SQLite
    pub async fn open(&self) -> anyhow::Result<SharedOrderStore> {
        match self {
            StoreBackend::Sqlite { url } => {
                let store = SqliteOrderStore::connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to open order database {}: {}", url, e))?;
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory order store; orders do not survive a restart");
                Ok(InMemoryOrderStore::shared())
            }
            StoreBackend::Unsupported(kind) => {
                anyhow::bail!("Unsupported ORDER_STORE {:?} (expected sqlite or memory)", kind)
            }
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Sqlite { url } => write!(f, "sqlite ({url})"),
            StoreBackend::Memory => f.write_str("memory"),
            StoreBackend::Unsupported(kind) => write!(f, "unsupported ({kind})"),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Storefront base URL; checkout redirects must stay under it
    pub base_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Directory holding products.toml, shipping.toml and countries.toml
    pub config_dir: PathBuf,
    /// Bound on one gateway session request
    pub checkout_timeout: Duration,
    /// Compare-and-set retries per webhook or admin action
    pub webhook_max_retries: u32,
    pub log_format: LogFormat,
    /// Order persistence (`ORDER_STORE`, `DATABASE_URL`)
    pub store: StoreBackend,
}

impl AppConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parsed_var("PORT").unwrap_or(8080),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            config_dir: std::env::var("CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config")),
            checkout_timeout: Duration::from_secs(parsed_var("CHECKOUT_TIMEOUT_SECS").unwrap_or(30)),
            webhook_max_retries: parsed_var("WEBHOOK_MAX_RETRIES")
                .unwrap_or(cart_core::webhook::DEFAULT_MAX_RETRIES),
            log_format: match std::env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            store: StoreBackend::parse(
                std::env::var("ORDER_STORE").ok().as_deref(),
                std::env::var("DATABASE_URL").ok(),
            ),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Catalog, shipping and country tables
    pub reference: Arc<ReferenceData>,
    pub store: SharedOrderStore,
    pub orders: OrderBuilder,
    pub checkout: CheckoutService,
    pub webhooks: WebhookProcessor,
    pub admin: AdminService,
    /// Gateway used for checkout and webhook verification
    pub gateway: BoxedPaymentStrategy,
}

impl AppState {
    /// Create a new AppState with the Stripe gateway and the configured store
    pub async fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();

        let reference = ReferenceData::load_dir(&config.config_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to load reference data from {}: {}",
                config.config_dir.display(),
                e
            )
        })?;

        let stripe_strategy = StripeCheckoutStrategy::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;

        let store = config.store.open().await?;

        Ok(Self::with_parts(
            config,
            reference,
            store,
            Arc::new(stripe_strategy),
        ))
    }

    /// Wire the services from explicit parts
    pub fn with_parts(
        config: AppConfig,
        reference: ReferenceData,
        store: SharedOrderStore,
        gateway: BoxedPaymentStrategy,
    ) -> Self {
        let reference = Arc::new(reference);
        let urls = CheckoutUrls::new(&config.base_url);

        let orders = OrderBuilder::new(reference.clone(), store.clone());
        let checkout = CheckoutService::new(store.clone(), gateway.clone(), urls)
            .with_timeout(config.checkout_timeout);
        let webhooks =
            WebhookProcessor::new(store.clone()).with_max_retries(config.webhook_max_retries);
        let admin = AdminService::new(store.clone()).with_max_retries(config.webhook_max_retries);

        Self {
            config,
            reference,
            store,
            orders,
            checkout,
            webhooks,
            admin,
            gateway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_defaults() {
        // Clear env vars for test
        std::env::remove_var("HOST");
        std::env::remove_var("PORT");
        std::env::remove_var("CHECKOUT_TIMEOUT_SECS");
        std::env::remove_var("LOG_FORMAT");

        let config = AppConfig::from_env();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.checkout_timeout, Duration::from_secs(30));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_store_backend_selection() {
        assert_eq!(
            StoreBackend::parse(None, None),
            StoreBackend::Sqlite {
                url: DEFAULT_DATABASE_URL.to_string()
            }
        );
        assert_eq!(
            StoreBackend::parse(Some("sqlite"), Some("sqlite:///var/lib/cart.db".to_string())),
            StoreBackend::Sqlite {
                url: "sqlite:///var/lib/cart.db".to_string()
            }
        );
        assert_eq!(StoreBackend::parse(Some("memory"), None), StoreBackend::Memory);
        assert_eq!(
            StoreBackend::parse(Some("postgres"), None),
            StoreBackend::Unsupported("postgres".to_string())
        );
    }

    #[tokio::test]
    async fn test_unsupported_store_fails_to_open() {
        let err = StoreBackend::Unsupported("redis".to_string())
            .open()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("redis"));
    }

    #[tokio::test]
    async fn test_sqlite_store_opens() {
        let path = std::env::temp_dir().join(format!("ppp-cart-{}.db", uuid::Uuid::new_v4()));
        let backend = StoreBackend::Sqlite {
            url: format!("sqlite://{}", path.display()),
        };

        let store = backend.open().await.unwrap();
        assert!(store.anomalies().await.unwrap().is_empty());

        drop(store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_socket_addr() {
        let mut config = crate::test_support::config();
        config.host = "0.0.0.0".to_string();
        config.port = 3000;

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:3000");

        config.host = "not a host".to_string();
        assert!(config.socket_addr().is_err());
    }
}
