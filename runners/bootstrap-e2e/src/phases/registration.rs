//! Registration listing check.

use crate::context::BootstrapContext;
use async_trait::async_trait;
use convergence::{ContainsSubstring, ConvergenceError, Phase, ResourceClass, ResourceKind};
use tracing::info;

/// Waits until the machine registration shows up in the management cluster.
///
/// Skipped for ISO boots, where nodes carry their registration on the media.
#[derive(Debug, Default)]
pub struct CheckRegistration;

#[async_trait]
impl Phase<BootstrapContext> for CheckRegistration {
    fn name(&self) -> &str {
        super::CHECK_REGISTRATION
    }

    fn should_run(&self, ctx: &BootstrapContext) -> bool {
        !ctx.config.iso_boot
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let registration = ctx.config.registration_name();
        let namespace = ctx.config.registration_namespace.as_str();
        let status = ctx.tools.status.as_ref();
        let poller = ctx.run.poller(ResourceClass::Registration)?;
        let what = format!("{} listing in {namespace}", ResourceKind::ElementalRegistration);

        let matcher = ContainsSubstring(registration.clone());
        let outcome = poller
            .poll_until(&what, &matcher, || async move {
                status
                    .list_names(namespace, ResourceKind::ElementalRegistration)
                    .await
                    .map(|names| names.join(" "))
            })
            .await;
        outcome.into_result(&what, &format!("contains {registration:?}"))?;

        info!(%registration, %namespace, "Registration found");
        Ok(())
    }
}
