//! Log/telemetry feeder — the collaborator that receives structured
//! policy-update notifications and free-form messages. The only production
//! implementation emits `tracing` events; tests substitute a spy.

use async_trait::async_trait;

use crate::crd::NormalizedHostSecurityPolicy;
use crate::model::Endpoint;

#[async_trait]
pub trait Feeder: Send + Sync {
    async fn update_security_policies(&self, action: &str, endpoint: &Endpoint);
    async fn update_host_security_policies(&self, action: &str, policies: &[NormalizedHostSecurityPolicy]);
    fn printf(&self, message: &str);
    fn errf(&self, message: &str);
}

pub struct TracingFeeder;

#[async_trait]
impl Feeder for TracingFeeder {
    async fn update_security_policies(&self, action: &str, endpoint: &Endpoint) {
        tracing::info!(
            action,
            namespace = %endpoint.namespace,
            endpoint = %endpoint.name,
            policy_count = endpoint.security_policies.len(),
            "security_policies_updated"
        );
    }

    async fn update_host_security_policies(&self, action: &str, policies: &[NormalizedHostSecurityPolicy]) {
        tracing::info!(
            action,
            policy_count = policies.len(),
            "host_security_policies_updated"
        );
    }

    fn printf(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn errf(&self, message: &str) {
        tracing::error!("{message}");
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingFeeder {
        pub policy_calls: Mutex<Vec<(String, String, String)>>,
        pub host_policy_calls: Mutex<Vec<(String, usize)>>,
        pub messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Feeder for RecordingFeeder {
        async fn update_security_policies(&self, action: &str, endpoint: &Endpoint) {
            self.policy_calls.lock().unwrap().push((
                action.to_string(),
                endpoint.namespace.clone(),
                endpoint.name.clone(),
            ));
        }

        async fn update_host_security_policies(&self, action: &str, policies: &[NormalizedHostSecurityPolicy]) {
            self.host_policy_calls
                .lock()
                .unwrap()
                .push((action.to_string(), policies.len()));
        }

        fn printf(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }

        fn errf(&self, message: &str) {
            self.messages.lock().unwrap().push(format!("ERR: {message}"));
        }
    }
}
