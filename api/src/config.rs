use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub s3_bucket: String,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    /// VAPID public key for Web Push (base64url)
    pub vapid_public_key: Option<String>,
    /// VAPID private key for Web Push (base64url)
    pub vapid_private_key: Option<String>,
    pub session_ttl_hours: i64,
    /// Registration is limited to this email domain when set.
    pub allowed_email_domain: Option<String>,
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub url: String,
    pub institution: String,
    pub term: String,
    pub max_pages: u32,
    pub refresh_hours: u64,
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:studybuddy.db?mode=rwc".into()),
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            s3_bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "studybuddy".into()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "auto".into()),
            vapid_public_key: env::var("VAPID_PUBLIC_KEY").ok(),
            vapid_private_key: env::var("VAPID_PRIVATE_KEY").ok(),
            session_ttl_hours: parse_or("SESSION_TTL_HOURS", 24 * 30),
            allowed_email_domain: env::var("ALLOWED_EMAIL_DOMAIN")
                .ok()
                .filter(|d| !d.is_empty()),
            catalog: CatalogConfig {
                url: env::var("CATALOG_URL").unwrap_or_else(|_| {
                    "https://sisuva.admin.virginia.edu/psc/ihprd/UVSS/SA/s/WEBLIB_HCX_CM.H_CLASS_SEARCH.FieldFormula.IScript_ClassSearch".into()
                }),
                institution: env::var("CATALOG_INSTITUTION").unwrap_or_else(|_| "UVA01".into()),
                term: env::var("CATALOG_TERM").unwrap_or_else(|_| "1248".into()),
                max_pages: parse_or("CATALOG_MAX_PAGES", 200),
                refresh_hours: parse_or("CATALOG_REFRESH_HOURS", 24),
            },
        }
    }
}
