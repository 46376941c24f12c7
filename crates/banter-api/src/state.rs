use std::sync::Arc;

use banter_db::Database;
use banter_gateway::Fanout;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub fanout: Fanout,
    pub jwt_secret: String,
}
