//! Network-boot preparation: registration config download and iPXE scripts.

use crate::context::BootstrapContext;
use async_trait::async_trait;
use convergence::{ConvergenceError, FieldPath, Phase, ResourceClass, ResourceKind};
use tracing::info;

/// Saves the registration's install config where the boot server serves it.
///
/// Reads `.status.registrationURL` of the `MachineRegistration` once, then
/// retries the download on the config-download budget. Skipped for ISO boots.
#[derive(Debug, Default)]
pub struct FetchRegistrationConfig;

#[async_trait]
impl Phase<BootstrapContext> for FetchRegistrationConfig {
    fn name(&self) -> &str {
        super::FETCH_REGISTRATION_CONFIG
    }

    fn should_run(&self, ctx: &BootstrapContext) -> bool {
        !ctx.config.iso_boot
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let registration = ctx.config.registration_name();
        let namespace = ctx.config.registration_namespace.as_str();
        let operation = format!("read {} {namespace}/{registration} registrationURL", ResourceKind::MachineRegistration);

        let url = ctx
            .tools
            .status
            .get_field(
                namespace,
                ResourceKind::MachineRegistration,
                &registration,
                &FieldPath::StatusField("registrationURL".to_string()),
            )
            .await
            .map_err(|e| ConvergenceError::collaborator(&operation, e))?;
        let url = url.trim();
        if url.is_empty() {
            return Err(ConvergenceError::collaborator(operation, "registration URL is empty"));
        }

        let dest = ctx.config.install_config_yaml.as_path();
        let fetcher = ctx.tools.fetcher.as_ref();
        let poller = ctx.run.poller(ResourceClass::ConfigDownload)?;
        let what = format!("download of {url}");
        let bytes = poller
            .retry_until_ok(&what, || fetcher.fetch(url, dest))
            .await?;

        info!(%url, dest = %dest.display(), bytes, "Registration config saved");
        Ok(())
    }
}

/// Points the iPXE boot scripts at the run's HTTP server. Skipped for ISO boots.
#[derive(Debug, Default)]
pub struct ConfigureIpxe;

#[async_trait]
impl Phase<BootstrapContext> for ConfigureIpxe {
    fn name(&self) -> &str {
        super::CONFIGURE_IPXE
    }

    fn should_run(&self, ctx: &BootstrapContext) -> bool {
        !ctx.config.iso_boot
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<(), ConvergenceError> {
        let server = ctx.config.http_server.as_str();
        let configured = ctx
            .tools
            .boot_scripts
            .configure(server)
            .await
            .map_err(|e| ConvergenceError::collaborator("configure iPXE", e))?;
        if configured == 0 {
            return Err(ConvergenceError::collaborator(
                "configure iPXE",
                format!("no boot script found in {}", ctx.config.ipxe_script_dir.display()),
            ));
        }

        info!(%server, configured, "iPXE scripts configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_with, Mocks};
    use convergence::ResourceRef;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::time::Instant;

    const URL: &str = "https://rancher.local/elemental/registration/abc";

    fn script_url(mocks: &Mocks, url: &str) {
        let registration = ResourceRef::new(
            ResourceKind::MachineRegistration,
            "default",
            "machine-registration-master-hardened",
        );
        mocks
            .status
            .script_field(&registration, FieldPath::StatusField("registrationURL".to_string()), [url]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_retried_until_it_succeeds() {
        let mocks = Mocks::new();
        script_url(&mocks, URL);
        mocks.fetcher.script(
            URL,
            vec![
                Err("503 Service Unavailable".to_string()),
                Err("503 Service Unavailable".to_string()),
                Ok("elemental: {}".to_string()),
            ],
        );
        let mut ctx = context_with(&mocks, &[("INSTALL_CONFIG_YAML", "/tmp/install-config.yaml")]);

        let started = Instant::now();
        FetchRegistrationConfig.run(&mut ctx).await.unwrap();

        // attempts at 0, 10, 20
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        let calls = mocks.fetcher.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], (URL.to_string(), PathBuf::from("/tmp/install-config.yaml")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_url_times_out() {
        let mocks = Mocks::new();
        script_url(&mocks, URL);
        let mut ctx = context_with(&mocks, &[]);

        let err = FetchRegistrationConfig.run(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ConvergenceError::Timeout { .. }));
        // 0, 10, ..., 120
        assert_eq!(mocks.fetcher.calls().len(), 13);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registration_url_fails() {
        let mocks = Mocks::new();
        script_url(&mocks, "");
        let mut ctx = context_with(&mocks, &[]);

        let err = FetchRegistrationConfig.run(&mut ctx).await.unwrap_err();

        assert!(matches!(err, ConvergenceError::Collaborator { .. }));
        assert!(mocks.fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_registration_fails_without_download() {
        let mocks = Mocks::new();
        let mut ctx = context_with(&mocks, &[]);

        let err = FetchRegistrationConfig.run(&mut ctx).await.unwrap_err();

        assert!(err.to_string().contains("registrationURL"));
        assert!(mocks.fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ipxe_pointed_at_http_server() {
        let mocks = Mocks::new();
        mocks.boot_scripts.set_scripts(2);
        let mut ctx = context_with(&mocks, &[("HTTP_SERVER", "http://10.0.0.1:8000")]);

        ConfigureIpxe.run(&mut ctx).await.unwrap();

        assert_eq!(mocks.boot_scripts.servers(), ["http://10.0.0.1:8000"]);
    }

    #[tokio::test]
    async fn test_no_ipxe_script_fails() {
        let mocks = Mocks::new();
        let mut ctx = context_with(&mocks, &[]);

        let err = ConfigureIpxe.run(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("no boot script"));
    }

    #[test]
    fn test_skipped_for_iso_boot() {
        let mocks = Mocks::new();
        let network = context_with(&mocks, &[]);
        let iso = context_with(&mocks, &[("BOOT_TYPE", "iso")]);
        assert!(FetchRegistrationConfig.should_run(&network));
        assert!(ConfigureIpxe.should_run(&network));
        assert!(!FetchRegistrationConfig.should_run(&iso));
        assert!(!ConfigureIpxe.should_run(&iso));
    }
}
