use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use shopsight::ask::AppContext;
use shopsight::config::Settings;
use shopsight::server;
use shopsight::types::AssistError;

#[tokio::main]
async fn main() -> Result<(), AssistError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let context = Arc::new(AppContext::from_settings(&settings).await?);
    server::serve(context, &settings.bind_addr).await
}
