use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use docgate::blob::LocalBlobStore;
use docgate::mail::{LogMailer, SendGridMailer};
use docgate::server::{run_with_port, AppState};
use docgate::store::FileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port: u16 = std::env::var("DOCGATE_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3000);
    let data_dir = std::env::var("DOCGATE_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let mail_from =
        std::env::var("DOCGATE_MAIL_FROM").unwrap_or_else(|_| "docgate@localhost".to_string());
    let sendgrid_key = std::env::var("DOCGATE_SENDGRID_API_KEY").ok();
    info!(
        target: "docgate",
        "docgate starting: RUST_LOG='{}', http_port={}, data_dir='{}', mail_from='{}', sendgrid={}",
        rust_log, http_port, data_dir, mail_from, sendgrid_key.is_some()
    );

    let store = FileStore::open_shared(format!("{data_dir}/docgate.json"))?;
    let blobs = LocalBlobStore::new_shared(format!("{data_dir}/pdfs"))?;
    let mailer = match sendgrid_key {
        Some(key) => SendGridMailer::new_shared(key, mail_from),
        None => {
            info!("DOCGATE_SENDGRID_API_KEY unset; login codes will only be logged");
            LogMailer::shared()
        }
    };

    run_with_port(http_port, AppState::new(store, blobs, mailer)).await
}
