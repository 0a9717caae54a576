use std::sync::Arc;

use bridge::Bridge;
use storage::Storage;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) bridge: Arc<Bridge>,
    pub(crate) storage: Storage,
    pub(crate) hs_token: Arc<str>,
}
