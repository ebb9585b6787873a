use std::sync::Arc;

use crate::health::HealthRegistry;
use crate::live::LiveCoordinator;

#[derive(Clone)]
pub struct State {
    pub live: Arc<LiveCoordinator>,
    pub health: Arc<HealthRegistry>,
}
