//! Upgrade orchestration.
//!
//! [`upgrade`] drives one [`Model`] through the checks and the vendor upgrade
//! procedure:
//!
//! 1. read the current software version and platform
//! 2. reject images for another platform
//! 3. reject downgrades
//! 4. succeed without touching the device when already at the target version
//! 5. apply the same checks to every extra image
//! 6. save the configuration
//! 7. run the vendor upgrade
//! 8. on dry run, stop there
//! 9. otherwise re-read the version and require an exact match
//!
//! [`update_host`] wraps that with image lookup and produces an
//! [`UpgradeResult`] for reporting.

use std::cmp::Ordering;

use log::{error, info, warn};
use serde::Serialize;

use crate::error::Result;
use crate::image::{Image, ImageProvider};
use crate::model::Model;
use crate::version::compare;

/// How an upgrade attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Installed and verified.
    Upgraded,

    /// Dry run passed every check.
    DryRun,

    /// Device already runs the target version. Nothing was changed.
    AlreadyCurrent,

    /// An image was built for another platform.
    PlatformMismatch { device: String, image: String },

    /// An image is older than the running version.
    Downgrade { current: String, image: String },

    /// The vendor procedure reported failure.
    UpgradeFailed,

    /// The device came back with an unexpected version.
    VersionMismatch { expected: String, actual: String },
}

impl Verdict {
    /// True when the device ends up on the image version (or would, on a dry run).
    pub fn succeeded(&self) -> bool {
        matches!(self, Verdict::Upgraded | Verdict::DryRun | Verdict::AlreadyCurrent)
    }
}

/// Compare one image against the device.
///
/// Returns `None` when the image may be installed.
fn check_image(
    hostname: &str,
    image: &Image,
    platform: &str,
    current: &str,
) -> Result<Option<Verdict>> {
    if image.platform != platform {
        error!(
            "{}: Skipping upgrade, device platform '{}' doesn't match image platform '{}'",
            hostname, platform, image.platform
        );
        return Ok(Some(Verdict::PlatformMismatch {
            device: platform.to_string(),
            image: image.platform.clone(),
        }));
    }

    match compare(&image.version, current)? {
        Ordering::Less => {
            warn!(
                "{}: Skipping upgrade, current version '{}' is newer than image version '{}'",
                hostname, current, image.version
            );
            Ok(Some(Verdict::Downgrade {
                current: current.to_string(),
                image: image.version.clone(),
            }))
        }
        Ordering::Equal => {
            warn!(
                "{}: Skipping upgrade, current version '{}' is same as image version '{}'",
                hostname, current, image.version
            );
            Ok(Some(Verdict::AlreadyCurrent))
        }
        Ordering::Greater => Ok(None),
    }
}

/// Upgrade `model` to `image` and report how it went.
///
/// Errors from the model (including a failed configuration save) are
/// returned as is. Rejections and failed verification are verdicts.
pub async fn upgrade_with_verdict(
    hostname: &str,
    model: &mut dyn Model,
    image: &Image,
    extra_images: &[Image],
    dry_run: bool,
) -> Result<Verdict> {
    let current_version = model.software_version().await?;
    let current_firmware = model.firmware_version().await?;
    let platform = model.platform().await?;

    for candidate in std::iter::once(image).chain(extra_images) {
        if let Some(verdict) = check_image(hostname, candidate, &platform, &current_version)? {
            return Ok(verdict);
        }
    }

    let marker = if dry_run { " (DRY RUN)" } else { "" };
    info!(
        "{}: Upgrading from '{}' to '{}'{}",
        hostname, current_version, image.version, marker
    );

    model.save_config(dry_run).await?;

    if !model.upgrade(image, extra_images, dry_run).await? {
        error!("{}: Upgrade command failed", hostname);
        return Ok(Verdict::UpgradeFailed);
    }

    if dry_run {
        info!("{}: Dry run, not verifying upgrade", hostname);
        return Ok(Verdict::DryRun);
    }

    let updated_version = model.software_version().await?;
    let updated_firmware = model.firmware_version().await?;

    if compare(&updated_version, &image.version)?.is_eq() {
        info!(
            "{}: Updated successfully from version '{}' (fw: {}) to version '{}' (fw: {})",
            hostname, current_version, current_firmware, updated_version, updated_firmware
        );
        return Ok(Verdict::Upgraded);
    }

    if compare(&updated_version, &current_version)?.is_eq() {
        error!(
            "{}: Update failed, version is '{}' after update (same as original)",
            hostname, updated_version
        );
    } else {
        error!(
            "{}: Update failed, version '{}' doesn't match expected version '{}' after upgrade",
            hostname, updated_version, image.version
        );
    }
    Ok(Verdict::VersionMismatch {
        expected: image.version.clone(),
        actual: updated_version,
    })
}

/// Upgrade `model` to `image`. `true` means the device is at the target
/// version (or would be, on dry run).
pub async fn upgrade(
    hostname: &str,
    model: &mut dyn Model,
    image: &Image,
    extra_images: &[Image],
    dry_run: bool,
) -> Result<bool> {
    upgrade_with_verdict(hostname, model, image, extra_images, dry_run)
        .await
        .map(|verdict| verdict.succeeded())
}

/// Per-host outcome for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeStatus {
    Success,
    /// Already at the target version.
    Skipped,
    Failed,
}

/// Report row for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeResult {
    pub hostname: String,
    pub status: UpgradeStatus,
    pub initial_software_version: Option<String>,
    pub current_software_version: Option<String>,
    pub initial_firmware_version: Option<String>,
    pub current_firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl UpgradeResult {
    fn failed(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            status: UpgradeStatus::Failed,
            initial_software_version: None,
            current_software_version: None,
            initial_firmware_version: None,
            current_firmware_version: None,
            message: None,
        }
    }
}

/// Ask each provider the model can install from, in order, for `filename`.
async fn find_image(
    supported: &[&str],
    providers: &[Box<dyn ImageProvider>],
    filename: &str,
    version: &str,
    platform: &str,
) -> Result<Option<Image>> {
    for provider in providers {
        if !supported.iter().any(|kind| *kind == provider.kind()) {
            continue;
        }
        if let Some(image) = provider.find_image(filename, version, platform).await? {
            return Ok(Some(image));
        }
    }
    Ok(None)
}

/// Find the images for `version` and upgrade one host.
///
/// Never fails: every error ends up as a [`UpgradeStatus::Failed`] result.
pub async fn update_host(
    model: &mut dyn Model,
    hostname: &str,
    version: &str,
    providers: &[Box<dyn ImageProvider>],
    dry_run: bool,
) -> UpgradeResult {
    info!("Running update to host {}", hostname);
    let mut result = UpgradeResult::failed(hostname);
    if let Err(e) = update(&mut result, model, version, providers, dry_run).await {
        error!("{}: Upgrade failed: {}", hostname, e);
        result.status = UpgradeStatus::Failed;
        result.message = Some(e.to_string());
    }
    result
}

async fn update(
    result: &mut UpgradeResult,
    model: &mut dyn Model,
    version: &str,
    providers: &[Box<dyn ImageProvider>],
    dry_run: bool,
) -> Result<()> {
    let hostname = result.hostname.clone();

    let software = model.software_version().await?;
    let firmware = model.firmware_version().await?;
    result.initial_software_version = Some(software.clone());
    result.current_software_version = Some(software);
    result.initial_firmware_version = Some(firmware.clone());
    result.current_firmware_version = Some(firmware);

    let platform = model.platform().await?;
    let supported = model.supported_image_provider_types();

    let filename = model.upgrade_package_name(version).await?;
    let Some(image) = find_image(supported, providers, &filename, version, &platform).await? else {
        error!(
            "{}: Failed to find upgrade image '{}' for {} {}",
            hostname, filename, version, platform
        );
        result.message = Some(format!("upgrade image '{}' not found", filename));
        return Ok(());
    };

    let mut extra_images = Vec::new();
    for extra in model.extra_package_names(version).await? {
        let Some(image) = find_image(supported, providers, &extra, version, &platform).await? else {
            error!(
                "{}: Failed to find extra image '{}' for {} {}",
                hostname, extra, version, platform
            );
            result.message = Some(format!("extra image '{}' not found", extra));
            return Ok(());
        };
        extra_images.push(image);
    }

    let verdict = upgrade_with_verdict(&hostname, model, &image, &extra_images, dry_run).await?;
    result.status = match &verdict {
        Verdict::AlreadyCurrent => UpgradeStatus::Skipped,
        v if v.succeeded() => UpgradeStatus::Success,
        _ => UpgradeStatus::Failed,
    };
    if !verdict.succeeded() {
        result.message = Some(format!("{:?}", verdict));
    }

    if dry_run {
        if verdict == Verdict::DryRun {
            result.current_software_version = Some(image.version.clone());
        }
        return Ok(());
    }

    // The verdict stands even if the device is unreachable for the report.
    match model.software_version().await {
        Ok(v) => result.current_software_version = Some(v),
        Err(e) => warn!("{}: Could not read software version: {}", hostname, e),
    }
    match model.firmware_version().await {
        Ok(v) => result.current_firmware_version = Some(v),
        Err(e) => warn!("{}: Could not read firmware version: {}", hostname, e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::{CommandError, Error};
    use crate::image::NetworkImage;

    /// Model whose version changes to `installs` when a real upgrade runs.
    struct MockModel {
        platform: String,
        current: String,
        installs: Option<String>,
        upgrade_ok: bool,
        save_fails: bool,
        extras: Vec<String>,
        saves: Vec<bool>,
        upgrades: Vec<(String, usize, bool)>,
        version_queries: usize,
    }

    impl MockModel {
        fn new(platform: &str, current: &str) -> Self {
            Self {
                platform: platform.to_string(),
                current: current.to_string(),
                installs: None,
                upgrade_ok: true,
                save_fails: false,
                extras: Vec::new(),
                saves: Vec::new(),
                upgrades: Vec::new(),
                version_queries: 0,
            }
        }

        fn installs(mut self, version: &str) -> Self {
            self.installs = Some(version.to_string());
            self
        }

        fn mutating_calls(&self) -> usize {
            self.saves.len() + self.upgrades.len()
        }
    }

    #[async_trait]
    impl Model for MockModel {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn platform(&mut self) -> Result<String> {
            Ok(self.platform.clone())
        }

        async fn software_version(&mut self) -> Result<String> {
            self.version_queries += 1;
            Ok(self.current.clone())
        }

        async fn firmware_version(&mut self) -> Result<String> {
            Ok("fw-1".to_string())
        }

        fn supported_image_provider_types(&self) -> &'static [&'static str] {
            &["tftp"]
        }

        async fn save_config(&mut self, dry_run: bool) -> Result<()> {
            self.saves.push(dry_run);
            if self.save_fails {
                return Err(CommandError::failed("Configuration save didn't succeed").into());
            }
            Ok(())
        }

        async fn upgrade(
            &mut self,
            image: &Image,
            extra_images: &[Image],
            dry_run: bool,
        ) -> Result<bool> {
            self.upgrades.push((image.version.clone(), extra_images.len(), dry_run));
            if !dry_run && self.upgrade_ok {
                if let Some(version) = &self.installs {
                    self.current = version.clone();
                }
            }
            Ok(self.upgrade_ok)
        }

        async fn execute(&mut self, _command: &str, _dry_run: bool) -> Result<String> {
            Ok(String::new())
        }

        async fn upgrade_package_name(&mut self, version: &str) -> Result<String> {
            Ok(format!("{}v{}.stk", self.platform, version))
        }

        async fn extra_package_names(&mut self, version: &str) -> Result<Vec<String>> {
            Ok(self.extras.iter().map(|e| format!("{}-{}.pkg", e, version)).collect())
        }
    }

    struct MockProvider {
        kind: &'static str,
        files: Vec<&'static str>,
        broken: bool,
        lookups: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn boxed(kind: &'static str, files: &[&'static str]) -> Box<dyn ImageProvider> {
            Box::new(Self {
                kind,
                files: files.to_vec(),
                broken: false,
                lookups: Mutex::new(Vec::new()),
            })
        }

        fn broken(kind: &'static str) -> Box<dyn ImageProvider> {
            Box::new(Self {
                kind,
                files: Vec::new(),
                broken: true,
                lookups: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ImageProvider for MockProvider {
        fn kind(&self) -> &str {
            self.kind
        }

        async fn find_image(
            &self,
            filename: &str,
            version: &str,
            platform: &str,
        ) -> Result<Option<Image>> {
            self.lookups.lock().unwrap().push(filename.to_string());
            if self.broken {
                return Err(crate::error::ImageError::Ambiguous {
                    filename: filename.to_string(),
                    directory: "/srv/images".to_string(),
                }
                .into());
            }
            Ok(self.files.iter().any(|f| *f == filename).then(|| {
                let source = NetworkImage::new(self.kind, "192.0.2.10", filename);
                Image::network(source, version, platform)
            }))
        }
    }

    fn image(version: &str, platform: &str) -> Image {
        Image::network(NetworkImage::new("tftp", "192.0.2.10", "image.stk"), version, platform)
    }

    #[test]
    fn test_verdict_succeeded() {
        assert!(Verdict::Upgraded.succeeded());
        assert!(Verdict::DryRun.succeeded());
        assert!(Verdict::AlreadyCurrent.succeeded());
        assert!(!Verdict::UpgradeFailed.succeeded());
        assert!(
            !Verdict::Downgrade {
                current: "7.13".into(),
                image: "7.12".into(),
            }
            .succeeded()
        );
    }

    #[tokio::test]
    async fn test_same_version_touches_nothing() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut model = MockModel::new("N1500", "15.2.3");
        let verdict = assert_ok!(
            upgrade_with_verdict("sw1", &mut model, &image("15.2.3", "N1500"), &[], false).await
        );

        assert_eq!(verdict, Verdict::AlreadyCurrent);
        assert!(verdict.succeeded());
        assert_eq!(model.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_platform_mismatch_rejected() {
        let mut model = MockModel::new("N1500", "6.6.3.1");
        assert!(!upgrade("sw1", &mut model, &image("6.7.1.6", "N3000"), &[], false).await.unwrap());
        assert_eq!(model.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_downgrade_rejected() {
        let mut model = MockModel::new("N1500", "6.0.1");
        let verdict = upgrade_with_verdict("sw1", &mut model, &image("6.0.0", "N1500"), &[], false)
            .await
            .unwrap();

        assert!(matches!(verdict, Verdict::Downgrade { .. }));
        assert_eq!(model.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_successful_upgrade_is_verified() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        let verdict = upgrade_with_verdict("r1", &mut model, &image("7.13", "arm64"), &[], false)
            .await
            .unwrap();

        assert_eq!(verdict, Verdict::Upgraded);
        assert_eq!(model.saves, vec![false]);
        assert_eq!(model.upgrades, vec![("7.13".to_string(), 0, false)]);
    }

    #[tokio::test]
    async fn test_post_check_requires_exact_version() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13.1");
        let verdict = upgrade_with_verdict("r1", &mut model, &image("7.13", "arm64"), &[], false)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Verdict::VersionMismatch {
                expected: "7.13".to_string(),
                actual: "7.13.1".to_string(),
            }
        );

        // Version unchanged after the procedure
        let mut model = MockModel::new("arm64", "7.12.1");
        assert!(!upgrade("r1", &mut model, &image("7.13", "arm64"), &[], false).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_vendor_upgrade() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        model.upgrade_ok = false;

        let verdict = upgrade_with_verdict("r1", &mut model, &image("7.13", "arm64"), &[], false)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::UpgradeFailed);
        assert_eq!(model.version_queries, 1);
    }

    #[tokio::test]
    async fn test_save_failure_is_fatal() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        model.save_fails = true;

        let err = assert_err!(upgrade("r1", &mut model, &image("7.13", "arm64"), &[], false).await);
        assert!(matches!(err, Error::Command(_)));
        assert!(model.upgrades.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_skips_verification() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        let verdict = upgrade_with_verdict("r1", &mut model, &image("7.13", "arm64"), &[], true)
            .await
            .unwrap();

        assert_eq!(verdict, Verdict::DryRun);
        assert_eq!(model.saves, vec![true]);
        assert_eq!(model.upgrades, vec![("7.13".to_string(), 0, true)]);
        assert_eq!(model.version_queries, 1);
        assert_eq!(model.current, "7.12.1");
    }

    #[tokio::test]
    async fn test_extra_images_checked() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        let extras = [image("7.13", "arm64"), image("7.13", "x86")];
        let target = image("7.13", "arm64");
        let verdict = upgrade_with_verdict("r1", &mut model, &target, &extras, false)
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::PlatformMismatch { .. }));
        assert_eq!(model.mutating_calls(), 0);

        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        let extras = [image("7.12.1", "arm64")];
        let target = image("7.13", "arm64");
        let verdict = upgrade_with_verdict("r1", &mut model, &target, &extras, false)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::AlreadyCurrent);
        assert_eq!(model.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_image_version_is_error() {
        let mut model = MockModel::new("arm64", "7.12.1");
        let err = assert_err!(upgrade("r1", &mut model, &image("7.x", "arm64"), &[], false).await);
        assert!(matches!(err, Error::Version(_)));
    }

    #[tokio::test]
    async fn test_update_host_success_report() {
        let mut model = MockModel::new("N1500", "6.6.3.1").installs("6.7.1.6");
        let providers = vec![MockProvider::boxed("tftp", &["N1500v6.7.1.6.stk"])];

        let result = update_host(&mut model, "sw1", "6.7.1.6", &providers, false).await;

        assert_eq!(result.status, UpgradeStatus::Success);
        assert_eq!(result.initial_software_version.as_deref(), Some("6.6.3.1"));
        assert_eq!(result.current_software_version.as_deref(), Some("6.7.1.6"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "hostname": "sw1",
                "status": "SUCCESS",
                "initial_software_version": "6.6.3.1",
                "current_software_version": "6.7.1.6",
                "initial_firmware_version": "fw-1",
                "current_firmware_version": "fw-1",
            })
        );
    }

    #[tokio::test]
    async fn test_update_host_skipped_when_current() {
        let mut model = MockModel::new("N1500", "6.7.1.6");
        let providers = vec![MockProvider::boxed("tftp", &["N1500v6.7.1.6.stk"])];

        let result = update_host(&mut model, "sw1", "6.7.1.6", &providers, false).await;
        assert_eq!(result.status, UpgradeStatus::Skipped);
        assert_eq!(serde_json::to_value(result.status).unwrap(), "SKIPPED");
        assert_eq!(model.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_host_dry_run_reports_target() {
        let mut model = MockModel::new("N1500", "6.6.3.1").installs("6.7.1.6");
        let providers = vec![MockProvider::boxed("tftp", &["N1500v6.7.1.6.stk"])];

        let result = update_host(&mut model, "sw1", "6.7.1.6", &providers, true).await;
        assert_eq!(result.status, UpgradeStatus::Success);
        assert_eq!(result.current_software_version.as_deref(), Some("6.7.1.6"));
        assert_eq!(model.current, "6.6.3.1");
    }

    #[tokio::test]
    async fn test_update_host_missing_image() {
        let mut model = MockModel::new("N1500", "6.6.3.1");
        let providers = vec![MockProvider::boxed("tftp", &[])];

        let result = update_host(&mut model, "sw1", "6.7.1.6", &providers, false).await;
        assert_eq!(result.status, UpgradeStatus::Failed);
        assert_eq!(result.current_software_version.as_deref(), Some("6.6.3.1"));
        assert!(result.message.unwrap().contains("N1500v6.7.1.6.stk"));
        assert_eq!(model.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_host_skips_unsupported_providers() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        model.extras = vec!["wifiwave2".to_string()];
        let providers = vec![
            MockProvider::broken("local"),
            MockProvider::boxed("tftp", &["arm64v7.13.stk", "wifiwave2-7.13.pkg"]),
        ];

        let result = update_host(&mut model, "r1", "7.13", &providers, false).await;
        assert_eq!(result.status, UpgradeStatus::Success);
        assert_eq!(model.upgrades, vec![("7.13".to_string(), 1, false)]);
    }

    #[tokio::test]
    async fn test_update_host_maps_errors_to_failed() {
        let mut model = MockModel::new("arm64", "7.12.1").installs("7.13");
        model.save_fails = true;
        let providers = vec![MockProvider::boxed("tftp", &["arm64v7.13.stk"])];

        let result = update_host(&mut model, "r1", "7.13", &providers, false).await;
        assert_eq!(result.status, UpgradeStatus::Failed);
        assert!(result.message.unwrap().contains("Configuration save"));
    }
}
