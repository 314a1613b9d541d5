use std::sync::Arc;

use crate::auth::IdentityVerifier;
use crate::media::MediaStore;
use crate::server::Server;
use crate::store::Store;

/// Shared handles every route needs.
#[derive(Clone)]
pub struct AppState {
    pub server: Server,
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub media: Arc<MediaStore>,
    pub max_upload_bytes: u64,
}
