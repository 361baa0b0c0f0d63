use tracing::info;
use tracing_subscriber::EnvFilter;

use parlor_relay::{router, ChannelRegistry, Config};

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let addr = config.listen_addr();
    let app = router(ChannelRegistry::new());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listen address");
    info!("parlor relay listening on {addr}");

    axum::serve(listener, app)
        .await
        .expect("server error");
}
