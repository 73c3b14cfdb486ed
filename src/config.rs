use std::env;

pub const DEFAULT_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub run_migrations: bool,
    pub app_base_url: String,
    pub payhere: PayHereSettings,
    pub calendar_api_url: String,
    pub default_session_minutes: i64,
}

/// Merchant credentials are optional so the server still boots for free-only
/// deployments; paid bookings refuse to proceed without them.
#[derive(Clone, Debug, Default)]
pub struct PayHereSettings {
    pub merchant_id: Option<String>,
    pub merchant_secret: Option<String>,
    pub sandbox: bool,
    pub currency: String,
}

impl PayHereSettings {
    pub fn checkout_url(&self) -> &'static str {
        if self.sandbox {
            "https://sandbox.payhere.lk/pay/checkout"
        } else {
            "https://www.payhere.lk/pay/checkout"
        }
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.merchant_id.as_deref(), self.merchant_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Some((id, secret)),
            _ => None,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);
        let app_base_url = env::var("APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        let default_session_minutes = env::var("DEFAULT_SESSION_MINUTES")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|m| *m > 0)
            .unwrap_or(45);

        let payhere = PayHereSettings {
            merchant_id: env::var("PAYHERE_MERCHANT_ID").ok(),
            merchant_secret: env::var("PAYHERE_MERCHANT_SECRET").ok(),
            sandbox: env_flag("PAYHERE_SANDBOX", true),
            currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "LKR".to_string()),
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            run_migrations: env_flag("RUN_MIGRATIONS", false),
            app_base_url,
            payhere,
            calendar_api_url: env::var("GOOGLE_CALENDAR_API_URL")
                .unwrap_or_else(|_| DEFAULT_CALENDAR_API_URL.to_string()),
            default_session_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_values() {
        let mut s = PayHereSettings {
            merchant_id: Some("1211149".into()),
            merchant_secret: None,
            sandbox: true,
            currency: "LKR".into(),
        };
        assert!(s.credentials().is_none());

        s.merchant_secret = Some(String::new());
        assert!(s.credentials().is_none());

        s.merchant_secret = Some("secret".into());
        assert_eq!(s.credentials(), Some(("1211149", "secret")));
    }

    #[test]
    fn checkout_url_follows_sandbox_flag() {
        let mut s = PayHereSettings::default();
        s.sandbox = true;
        assert!(s.checkout_url().contains("sandbox"));
        s.sandbox = false;
        assert_eq!(s.checkout_url(), "https://www.payhere.lk/pay/checkout");
    }
}
