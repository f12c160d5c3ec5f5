use failsafe::backoff::Exponential;
use failsafe::failure_policy::ConsecutiveFailures;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the durable store.
pub type StoreCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates the breaker that trips after 5 consecutive durable-store failures.
///
/// While open, store calls fail fast and the tiered cache treats the layer as a miss.
/// Recovery is probed after an exponential wait between 10s and 60s.
pub fn create_store_circuit_breaker() -> StoreCircuitBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));
    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);
    Config::new().failure_policy(failure_policy).build()
}
