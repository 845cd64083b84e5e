use async_trait::async_trait;
use uuid::Uuid;

use super::{cleanup_message, halt, Step};
use crate::client::{codes, AllocateEipRequest, ClientExt, EipStatus};
use crate::config::{BuildConfig, DEFAULT_INTERNET_CHARGE_TYPE};
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;
use crate::retry::{retry_on_codes, wait_for_expected, WaitResult};

/// An error plus the context line shown before it.
type StepFailure = (BuildError, &'static str);

/// Publishes the address the communicator connects to.
///
/// With `associate_public_ip_address` an elastic address is bound to the
/// instance: the caller's own `eip_id` when given, otherwise a freshly
/// allocated one. The private address is published instead when
/// `ssh_private_ip` is set or no elastic address is bound; the association
/// is kept either way.
#[derive(Debug, Default)]
pub struct ConfigureAddress {
    allocation_id: Option<String>,
    allocated_here: bool,
    associated_instance: Option<String>,
}

impl ConfigureAddress {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn bind_eip(&mut self, ctx: &RunContext) -> Result<String, StepFailure> {
        let region = ctx.config.region.clone();
        let instance_id = ctx
            .instance()
            .map(|i| i.instance_id.clone())
            .map_err(|e| (e.into(), "Error reading instance"))?;

        let allocation_id = match ctx.config.eip_id.clone() {
            Some(eip_id) => {
                ctx.ui.say("Querying elastic IP...");
                let found = ctx
                    .client
                    .describe_eips(&region, &eip_id)
                    .await
                    .map_err(|e| (e.into(), "Failed querying eip"))?;
                let Some(eip) = found.into_iter().next() else {
                    return Err((
                        BuildError::precondition(format!(
                            "The specified EIP {eip_id} doesn't exist."
                        )),
                        "",
                    ));
                };
                ctx.ui.message(&format!("Using eip: {}", eip.ip_address));
                eip.allocation_id
            }
            None => {
                ctx.ui.say("Allocating elastic IP...");
                let request = allocate_request(&ctx.config);
                let eip = wait_for_expected(
                    &ctx.retry.default,
                    ctx.cancel_token(),
                    || ctx.client.allocate_eip(&request),
                    retry_on_codes(&[codes::LAST_TOKEN_PROCESSING]),
                )
                .await
                .map_err(|e| (e.into(), "Error allocating eip"))?;
                self.allocated_here = true;
                eip.allocation_id
            }
        };
        self.allocation_id = Some(allocation_id.clone());

        ctx.client
            .wait_for_eip_status(
                &region,
                &allocation_id,
                EipStatus::Available,
                &ctx.retry.default,
                ctx.cancel_token(),
            )
            .await
            .map_err(|e| (e.into(), "Error waiting for eip to be available"))?;

        match ctx
            .client
            .associate_eip(&region, &allocation_id, &instance_id)
            .await
        {
            Ok(()) => {}
            Err(e) if e.has_code_in(&[codes::TASK_CONFLICT]) => {
                ctx.ui.error(&format!("Error associating eip: {e}"));
            }
            Err(e) => return Err((e.into(), "Error associating eip")),
        }
        self.associated_instance = Some(instance_id);

        let eip = ctx
            .client
            .wait_for_eip_status(
                &region,
                &allocation_id,
                EipStatus::InUse,
                &ctx.retry.default,
                ctx.cancel_token(),
            )
            .await
            .map_err(|e| (e.into(), "Error waiting for eip to be associated"))?;

        ctx.ui.message(&format!("Allocated eip: {}", eip.ip_address));
        Ok(eip.ip_address)
    }

    async fn private_address(ctx: &RunContext) -> Result<String, StepFailure> {
        let instance = ctx
            .instance()
            .map_err(|e| (e.into(), "Error reading instance"))?;
        let region = ctx.config.region.clone();
        let instance_id = instance.instance_id.clone();
        let described = wait_for_expected(
            &ctx.retry.private_ip,
            ctx.cancel_token(),
            || ctx.client.describe_instance(&region, &instance_id),
            |response| match response {
                Ok(i) if !i.private_ip_addresses.is_empty() => WaitResult::Success,
                _ => WaitResult::Retry,
            },
        )
        .await
        .map_err(|e| (e.into(), "Error getting private IP"))?;

        described
            .private_ip_addresses
            .into_iter()
            .next()
            .ok_or_else(|| {
                (
                    BuildError::precondition(format!("instance {instance_id} has no private IP")),
                    "Error getting private IP",
                )
            })
    }
}

fn allocate_request(config: &BuildConfig) -> AllocateEipRequest {
    AllocateEipRequest {
        client_token: Uuid::now_v7().to_string(),
        region_id: config.region.clone(),
        internet_charge_type: Some(
            config
                .internet_charge_type
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| DEFAULT_INTERNET_CHARGE_TYPE.to_string()),
        ),
        bandwidth: (config.internet_max_bandwidth_out > 0)
            .then_some(config.internet_max_bandwidth_out),
    }
}

#[async_trait]
impl Step for ConfigureAddress {
    fn name(&self) -> &str {
        "config_eip"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let mut address = if ctx.config.associate_public_ip_address {
            self.bind_eip(ctx).await
        } else {
            Self::private_address(ctx).await
        };
        let bound = ctx.config.associate_public_ip_address && address.is_ok();
        if bound && ctx.config.ssh_private_ip {
            address = Self::private_address(ctx).await;
        }

        match address {
            Ok(ip) => {
                tracing::info!(step = self.name(), ip_address = %ip, "Address published");
                if let Err(e) = ctx.set_ip_address(ip) {
                    return halt(ctx, self.name(), e.into(), "");
                }
                StepAction::Continue
            }
            Err((e, prefix)) => halt(ctx, self.name(), e, prefix),
        }
    }

    async fn cleanup(&mut self, ctx: &mut RunContext) {
        let Some(allocation_id) = self.allocation_id.clone() else {
            return;
        };
        let region = ctx.config.region.clone();

        if let Some(instance_id) = self.associated_instance.take() {
            ctx.ui.say(&cleanup_message(ctx, "Elastic IP"));
            if let Err(e) = ctx
                .client
                .unassociate_eip(&region, &allocation_id, &instance_id)
                .await
            {
                ctx.ui
                    .error(&format!("Failed to unassociate eip {allocation_id}: {e}"));
            } else if let Err(e) = ctx
                .client
                .wait_for_eip_status(
                    &region,
                    &allocation_id,
                    EipStatus::Available,
                    &ctx.retry.default,
                    None,
                )
                .await
            {
                ctx.ui.error(&format!(
                    "Timeout while unassociating eip {allocation_id}: {e}"
                ));
            }
        }

        if std::mem::take(&mut self.allocated_here) {
            if let Err(e) = ctx.client.release_eip(&region, &allocation_id).await {
                tracing::warn!(allocation_id = %allocation_id, error = %e, "EIP release failed");
                ctx.ui
                    .error(&format!("Failed to release eip {allocation_id}: {e}"));
            }
        }
        self.allocation_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ops;
    use crate::errors::ProviderError;
    use crate::steps::CreateInstance;
    use crate::testing::TestContext;
    use crate::ui::UiLevel;

    async fn with_instance(fixture: &TestContext) -> RunContext {
        let mut ctx = fixture.build();
        let image = fixture.client.image("ubuntu_20_04").unwrap();
        ctx.set_source_image(image).unwrap();
        assert_eq!(
            CreateInstance::new().run(&mut ctx).await,
            StepAction::Continue
        );
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_address_without_eip() {
        let fixture = TestContext::new();
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Continue);
        assert!(ctx.ip_address().unwrap().starts_with("172.16.0."));

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::ALLOCATE_EIP), 0);
        assert_eq!(fixture.client.calls_of(ops::RELEASE_EIP), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allocated_eip_is_released_exactly_once() {
        let fixture = TestContext::new().configure(|c| {
            c.associate_public_ip_address = true;
        });
        fixture.client.fail_next(
            ops::ALLOCATE_EIP,
            ProviderError::new(codes::LAST_TOKEN_PROCESSING, "previous token busy"),
        );
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Continue);
        assert_eq!(fixture.client.calls_of(ops::ALLOCATE_EIP), 2);
        assert!(ctx.ip_address().unwrap().starts_with("47.95.0."));
        let allocation_id = fixture.client.eip_ids().pop().unwrap();
        assert_eq!(
            fixture.client.eip(&allocation_id).unwrap().status,
            EipStatus::InUse
        );

        step.cleanup(&mut ctx).await;
        step.cleanup(&mut ctx).await;

        assert_eq!(fixture.client.targets_of(ops::RELEASE_EIP), vec![allocation_id]);
        assert!(fixture.client.eip_ids().is_empty());
        assert_eq!(fixture.client.calls_of(ops::UNASSOCIATE_EIP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_owned_eip_is_never_released() {
        let fixture = TestContext::new().configure(|c| {
            c.associate_public_ip_address = true;
            c.eip_id = Some("eip-own".into());
        });
        fixture.client.seed_eip("cn-beijing", "eip-own", "1.2.3.4");
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Continue);
        assert_eq!(ctx.ip_address().unwrap(), "1.2.3.4");

        ctx.mark_cancelled();
        step.cleanup(&mut ctx).await;

        assert_eq!(fixture.client.calls_of(ops::ALLOCATE_EIP), 0);
        assert_eq!(fixture.client.calls_of(ops::RELEASE_EIP), 0);
        let eip = fixture.client.eip("eip-own").unwrap();
        assert_eq!(eip.status, EipStatus::Available);
        assert_eq!(eip.instance_id, None);
        assert!(fixture
            .ui
            .contains("Deleting Elastic IP because of cancellation or error..."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_private_ip_wins_over_bound_eip() {
        let fixture = TestContext::new().configure(|c| {
            c.associate_public_ip_address = true;
            c.ssh_private_ip = true;
        });
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Continue);
        assert!(ctx.ip_address().unwrap().starts_with("172.16.0."));
        let allocation_id = fixture.client.eip_ids().pop().unwrap();
        assert_eq!(
            fixture.client.eip(&allocation_id).unwrap().status,
            EipStatus::InUse
        );

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::UNASSOCIATE_EIP), 1);
        assert_eq!(fixture.client.targets_of(ops::RELEASE_EIP), vec![allocation_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_caller_eip_halts_without_polling() {
        let fixture = TestContext::new().configure(|c| {
            c.associate_public_ip_address = true;
            c.eip_id = Some("eip-missing".into());
        });
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Halt);
        assert_eq!(fixture.client.calls_of(ops::DESCRIBE_EIPS), 1);
        assert_eq!(fixture.client.calls_of(ops::ASSOCIATE_EIP), 0);
        assert_eq!(
            ctx.error().unwrap().to_string(),
            "config_eip: The specified EIP eip-missing doesn't exist."
        );

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::UNASSOCIATE_EIP), 0);
        assert_eq!(fixture.client.calls_of(ops::RELEASE_EIP), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_conflict_is_reported_and_waited_out() {
        let fixture = TestContext::new().configure(|c| {
            c.associate_public_ip_address = true;
        });
        fixture.client.fail_next(
            ops::ASSOCIATE_EIP,
            ProviderError::new(codes::TASK_CONFLICT, "in progress"),
        );
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        // Nothing else is associating the address, so the InUse wait runs out.
        assert_eq!(step.run(&mut ctx).await, StepAction::Halt);

        let errors = fixture.ui.lines_at(UiLevel::Error);
        assert!(errors[0].starts_with("Error associating eip: [TaskConflict]"));
        assert!(errors[1].starts_with("Error waiting for eip to be associated"));

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::RELEASE_EIP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_associate_error_halts() {
        let fixture = TestContext::new().configure(|c| {
            c.associate_public_ip_address = true;
        });
        fixture
            .client
            .fail_next(ops::ASSOCIATE_EIP, ProviderError::new("Forbidden", "denied"));
        let mut ctx = with_instance(&fixture).await;
        let mut step = ConfigureAddress::new();

        assert_eq!(step.run(&mut ctx).await, StepAction::Halt);
        assert_eq!(ctx.error().unwrap().provider_code(), Some("Forbidden"));

        step.cleanup(&mut ctx).await;
        assert_eq!(fixture.client.calls_of(ops::UNASSOCIATE_EIP), 0);
        assert_eq!(fixture.client.calls_of(ops::RELEASE_EIP), 1);
        assert!(fixture.client.eip_ids().is_empty());
    }
}
