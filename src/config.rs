// =============================================================================
// Service Configuration — environment-derived settings
// =============================================================================
//
// Everything comes from the environment (plus .env via dotenv in main):
//
//   PORT              listen port (default 5000)
//   NODE_ENV          "development" | "production" (default development)
//   FRONTEND_URL      single allowed CORS origin; localhost is auto-allowed
//                     in development
//   POLYGON_API_KEY   vendor key (primary)
//   MASSIVE_API_KEY   vendor key (fallback)
//   FLOWNEXUS_TICKERS comma list overriding the hot-ticker set
// =============================================================================

use serde::Serialize;

fn default_hot_tickers() -> Vec<String> {
    [
        "SPY", "QQQ", "AAPL", "TSLA", "NVDA", "AMD", "MSFT", "META", "AMZN", "GOOGL",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Immutable service configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub frontend_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub rest_base: String,
    pub ws_url: String,
    pub hot_tickers: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000);

        let environment =
            std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());

        let frontend_url = std::env::var("FRONTEND_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let api_key = std::env::var("POLYGON_API_KEY")
            .or_else(|_| std::env::var("MASSIVE_API_KEY"))
            .unwrap_or_default();

        let hot_tickers = std::env::var("FLOWNEXUS_TICKERS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|t| t.trim().to_uppercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_hot_tickers);

        Self {
            port,
            environment,
            frontend_url,
            api_key,
            rest_base: "https://api.massive.com".to_string(),
            ws_url: "wss://socket.polygon.io/options".to_string(),
            hot_tickers,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment != "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            environment: "development".to_string(),
            frontend_url: None,
            api_key: String::new(),
            rest_base: "https://api.massive.com".to_string(),
            ws_url: "wss://socket.polygon.io/options".to_string(),
            hot_tickers: default_hot_tickers(),
        }
    }
}
