use std::env;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
}

/// Which gateway backs payment links. Selected once at startup; handlers never
/// probe credentials per call.
#[derive(Debug, Clone)]
pub enum GatewaySettings {
    Stripe(StripeSettings),
    Sandbox { webhook_secret: Option<String> },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub base_url: String,
    pub cors_origin: Option<String>,
    pub currency: String,
    pub app_env: AppEnv,
    pub gateway: GatewaySettings,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_env = match env::var("APP_ENV").as_deref() {
            Ok("production") => AppEnv::Production,
            _ => AppEnv::Development,
        };

        let gateway = match (env::var("STRIPE_SECRET_KEY"), env::var("STRIPE_WEBHOOK_SECRET")) {
            (Ok(secret_key), Ok(webhook_secret))
                if !secret_key.is_empty() && !webhook_secret.is_empty() =>
            {
                GatewaySettings::Stripe(StripeSettings {
                    secret_key,
                    webhook_secret,
                })
            }
            _ => {
                let webhook_secret = env::var("SANDBOX_WEBHOOK_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty());
                if app_env == AppEnv::Production && webhook_secret.is_none() {
                    return Err(ConfigError::Invalid(
                        "production requires STRIPE_SECRET_KEY/STRIPE_WEBHOOK_SECRET \
                         or SANDBOX_WEBHOOK_SECRET"
                            .to_string(),
                    ));
                }
                warn!("Stripe credentials absent, running with the sandbox payment gateway");
                GatewaySettings::Sandbox { webhook_secret }
            }
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            base_url: env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            app_env,
            gateway,
        })
    }
}
