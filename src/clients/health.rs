use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use lapin::{Connection, ConnectionProperties};
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::config::Config;
use crate::models::health::{HealthCheckResponse, HealthStatus, ServiceHealth};
use crate::models::message::Channel;

pub struct HealthChecker {
    config: Config,
    breakers: HashMap<Channel, Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new(config: Config, breakers: HashMap<Channel, Arc<CircuitBreaker>>) -> Self {
        Self { config, breakers }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_broker().await);
        checks.insert("cache_service".to_string(), self.check_redis().await);

        for (channel, breaker) in &self.breakers {
            checks.insert(
                format!("{}_breaker", channel),
                self.check_breaker(breaker),
            );
        }

        let overall_status = determine_overall_status(&checks);

        HealthCheckResponse {
            status: overall_status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_broker(&self) -> ServiceHealth {
        let start = Instant::now();

        match Connection::connect(&self.config.rabbitmq_url, ConnectionProperties::default()).await
        {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Broker health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                ServiceHealth::unhealthy(format!("Connection failed: {}", e))
            }
        }
    }

    async fn check_redis(&self) -> ServiceHealth {
        let start = Instant::now();

        match redis::Client::open(self.config.redis_url.as_str()) {
            Ok(client) => match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => match conn.ping::<String>().await {
                    Ok(_) => {
                        let elapsed = start.elapsed().as_millis() as u64;
                        debug!(response_time_ms = elapsed, "Redis health check passed");
                        ServiceHealth::healthy(elapsed)
                    }
                    Err(e) => {
                        warn!(error = %e, "Redis ping failed");
                        ServiceHealth::unhealthy(format!("Ping failed: {}", e))
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Redis connection failed");
                    ServiceHealth::unhealthy(format!("Connection failed: {}", e))
                }
            },
            Err(e) => {
                warn!(error = %e, "Redis client creation failed");
                ServiceHealth::unhealthy(format!("Client creation failed: {}", e))
            }
        }
    }

    fn check_breaker(&self, breaker: &CircuitBreaker) -> ServiceHealth {
        let state = breaker.state();
        let state_str = state.as_str().to_string();

        match state {
            CircuitState::Closed => ServiceHealth::healthy(0).with_circuit_breaker(state_str),
            CircuitState::HalfOpen => ServiceHealth::degraded(
                state_str,
                Some("Circuit breaker in recovery mode".to_string()),
            ),
            CircuitState::Open => ServiceHealth::degraded(state_str, None),
        }
    }
}

fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let has_unhealthy = checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded);

    if has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
