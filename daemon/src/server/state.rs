//! Server state

use std::sync::Arc;

use crate::authn::external_key::ExternalKey;
use crate::authn::token::TokenService;
use crate::authn::users::CredentialStore;
use crate::deploy::deployer::Deployer;
use crate::deploy::engine::ContainerEngine;
use crate::server::gateway::Gateway;
use crate::workers::redeploy::RedeployQueue;

/// Server state shared across handlers
pub struct ServerState {
    pub deployer: Arc<dyn Deployer>,
    pub engine: Arc<dyn ContainerEngine>,
    pub gateway: Arc<Gateway>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<CredentialStore>,
    /// Verifies webhook deliveries; webhooks are rejected without one
    pub webhook_key: Option<Arc<ExternalKey>>,
    pub redeploys: RedeployQueue,
}

impl ServerState {
    pub fn new(
        deployer: Arc<dyn Deployer>,
        engine: Arc<dyn ContainerEngine>,
        tokens: Arc<TokenService>,
        users: Arc<CredentialStore>,
        webhook_key: Option<Arc<ExternalKey>>,
        redeploys: RedeployQueue,
    ) -> Self {
        Self {
            deployer,
            engine,
            gateway: Arc::new(Gateway::new(tokens.clone(), users.clone())),
            tokens,
            users,
            webhook_key,
            redeploys,
        }
    }
}
