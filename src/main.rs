use std::sync::Arc;

use clap::Parser;
use socialx_realtime::auth::JwtVerifier;
use socialx_realtime::config::Config;
use socialx_realtime::media::MediaStore;
use socialx_realtime::routes;
use socialx_realtime::server::Server;
use socialx_realtime::state::AppState;
use socialx_realtime::store::{MemoryStore, Store};
use socialx_realtime::tls::load_tls_files;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::parse();
    config.validate()?;
    let addr = config.socket_addr()?;

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let media = MediaStore::open(&config.uploads_dir, config.max_upload_bytes).await?;
    let state = AppState {
        server: Server::new(store.clone(), &config.hub_settings()),
        store,
        verifier: Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes())),
        media: Arc::new(media),
        max_upload_bytes: config.max_upload_bytes,
    };

    let routes = routes::routes(state, &config.allowed_origins);

    let tls = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => match load_tls_files(cert, key) {
            Ok(files) => Some(files),
            Err(e) => {
                log::warn!("Failed to load TLS files, falling back to HTTP/WS: {}", e);
                None
            }
        },
        _ => None,
    };

    match tls {
        Some(files) => {
            log::info!("Starting secure server (HTTPS/WSS) on {}", addr);
            warp::serve(routes)
                .tls()
                .cert_path(files.cert_path)
                .key_path(files.key_path)
                .run(addr)
                .await;
        }
        None => {
            log::info!("Starting server (HTTP/WS) on {}", addr);
            warp::serve(routes).run(addr).await;
        }
    }

    Ok(())
}
