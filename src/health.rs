use chrono::{DateTime, Utc};
use dashmap::DashMap;
use media_server::{ServerConnection, ServerType};
use notify_stream::ConnectionState;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Not polled yet.
    Pending,
    Ok,
    Unreachable,
    /// Credentials were rejected; the configuration needs fixing.
    NeedsAttention,
    DecodeError,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerHealth {
    pub server_id: String,
    pub server_type: ServerType,
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Push connection state for servers that subscribe.
    pub push: Option<ConnectionState>,
}

#[derive(Default)]
pub struct HealthRegistry {
    servers: DashMap<String, ServerHealth>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: &ServerConnection) {
        self.servers.insert(
            connection.id.clone(),
            ServerHealth {
                server_id: connection.id.clone(),
                server_type: connection.server_type,
                status: if connection.enabled {
                    HealthStatus::Pending
                } else {
                    HealthStatus::Disabled
                },
                last_error: None,
                last_poll_at: None,
                last_success_at: None,
                push: None,
            },
        );
    }

    pub fn record_success(&self, server_id: &str, at: DateTime<Utc>) {
        if let Some(mut health) = self.servers.get_mut(server_id) {
            health.status = HealthStatus::Ok;
            health.last_error = None;
            health.last_poll_at = Some(at);
            health.last_success_at = Some(at);
        }
    }

    pub fn record_failure(
        &self,
        server_id: &str,
        status: HealthStatus,
        error: String,
        at: DateTime<Utc>,
    ) {
        if let Some(mut health) = self.servers.get_mut(server_id) {
            health.status = status;
            health.last_error = Some(error);
            health.last_poll_at = Some(at);
        }
    }

    pub fn set_push_state(&self, server_id: &str, state: ConnectionState) {
        if let Some(mut health) = self.servers.get_mut(server_id) {
            health.push = Some(state);
        }
    }

    pub fn get(&self, server_id: &str) -> Option<ServerHealth> {
        self.servers.get(server_id).map(|h| h.value().clone())
    }

    pub fn list(&self) -> Vec<ServerHealth> {
        let mut servers: Vec<ServerHealth> =
            self.servers.iter().map(|h| h.value().clone()).collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(id: &str, enabled: bool) -> ServerConnection {
        ServerConnection {
            id: id.to_string(),
            server_type: ServerType::Emby,
            base_url: "http://localhost".to_string(),
            credential: String::new(),
            enabled,
        }
    }

    #[test]
    fn tracks_last_outcome() {
        let registry = HealthRegistry::new();
        registry.register(&connection("b", true));
        registry.register(&connection("a", false));
        assert_eq!(registry.get("b").unwrap().status, HealthStatus::Pending);
        assert_eq!(registry.get("a").unwrap().status, HealthStatus::Disabled);

        let now = Utc::now();
        registry.record_failure("b", HealthStatus::NeedsAttention, "401".to_string(), now);
        let health = registry.get("b").unwrap();
        assert_eq!(health.status, HealthStatus::NeedsAttention);
        assert_eq!(health.last_success_at, None);

        registry.record_success("b", now);
        let health = registry.get("b").unwrap();
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.last_error, None);
        assert_eq!(health.last_success_at, Some(now));

        let ids: Vec<String> = registry.list().into_iter().map(|h| h.server_id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unknown_servers_are_ignored() {
        let registry = HealthRegistry::new();
        registry.record_success("ghost", Utc::now());
        registry.set_push_state("ghost", ConnectionState::Connected);
        assert!(registry.list().is_empty());
    }
}
