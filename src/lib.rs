pub mod auth;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod routes;
pub mod utils;
pub mod websocket;
pub mod ws;

use ws::RoomRegistry;

/// Shared state of the relay server
pub struct AppState {
    pub rooms: RoomRegistry,
    pub jwt_secret: Option<String>,
}

impl AppState {
    pub fn new(config: &config::Config) -> Self {
        Self {
            rooms: RoomRegistry::new(&config.presence(), config.room_idle()),
            jwt_secret: config.cloud_auth_jwt_secret.clone(),
        }
    }
}
