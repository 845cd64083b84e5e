use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::{halt, Step};
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;

/// Where and how the communicator reaches the running instance.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionTarget {
    /// Address to connect to.
    pub host: String,
    /// Port to connect to.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password, if password authentication is configured.
    pub password: Option<String>,
    /// Instance being customised.
    pub instance_id: String,
}

impl fmt::Debug for ProvisionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Customises a running instance, e.g. over SSH.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Connects to `target` and runs the customisation.
    async fn provision(&self, target: &ProvisionTarget) -> anyhow::Result<()>;
}

/// Hands the published address to the [`Provisioner`].
///
/// Without a provisioner, or with the `none` communicator, the step only
/// reports where the instance can be reached.
#[derive(Default)]
pub struct Provision {
    provisioner: Option<Arc<dyn Provisioner>>,
}

impl fmt::Debug for Provision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provision")
            .field("has_provisioner", &self.provisioner.is_some())
            .finish()
    }
}

impl Provision {
    /// Creates the step.
    #[must_use]
    pub fn new(provisioner: Option<Arc<dyn Provisioner>>) -> Self {
        Self { provisioner }
    }
}

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &str {
        "provision"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let comm = &ctx.config.communicator;
        if comm.is_disabled() {
            ctx.ui.say("Communicator is disabled, skipping provisioning");
            return StepAction::Continue;
        }

        let host = match ctx.ip_address() {
            Ok(ip) => ip.to_string(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading instance address"),
        };
        let instance_id = match ctx.instance() {
            Ok(instance) => instance.instance_id.clone(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading instance"),
        };

        let Some(provisioner) = self.provisioner.clone() else {
            ctx.ui
                .message(&format!("Instance {instance_id} is reachable at {host}"));
            return StepAction::Continue;
        };

        let comm = &ctx.config.communicator;
        let target = ProvisionTarget {
            host,
            port: comm.ssh_port,
            username: comm.ssh_username.clone(),
            password: comm.instance_password().map(str::to_string),
            instance_id,
        };
        ctx.ui.say(&format!(
            "Provisioning with {} at {}:{}...",
            comm.kind, target.host, target.port
        ));

        let cancellation = ctx.cancellation.clone();
        let outcome = tokio::select! {
            biased;
            () = cancellation.cancelled() => None,
            result = provisioner.provision(&target) => Some(result),
        };

        match outcome {
            None => {
                ctx.mark_cancelled();
                StepAction::Cancelled
            }
            Some(Ok(())) => StepAction::Continue,
            Some(Err(e)) => halt(ctx, self.name(), BuildError::Provision(format!("{e:#}")), ""),
        }
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}
