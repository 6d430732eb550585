//! MikroTik RouterOS model.
//!
//! RouterOS runs every command through a one-shot exec channel and reports
//! errors inline in stdout, so each reply is checked against a table of known
//! error strings. Images are pushed over SFTP and installed by rebooting.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::error::{CommandError, Error, Result};
use crate::image::{Image, LocalImage};
use crate::model::parsers::{tabular, vertical_value};
use crate::model::{
    BoxedSession, DEFAULT_COMMAND_TIMEOUT, Model, ModelDefinition, ModelOptions, log_command,
};
use crate::transport::Session;

/// Substrings RouterOS prints instead of failing the exec channel.
const CLI_ERRORS: &[&str] = &[
    "expected end of command (",
    "bad command name",
    "input does not match any value of",
    "syntax error (",
    "expected command name",
    "invalid internal item number",
    "failure: ",
    "max line length 65535 exceeded!",
    "expected closing",
    "no such item",
    "value of passphrase should not be shorter than",
    "invalid value ",
];

const CLI_DUPLICATE_WARNINGS: &[&str] = &["failure: already have"];

/// Time for the routerboard to stage new firmware before rebooting.
const FIRMWARE_SETTLE: Duration = Duration::from_secs(5);

pub fn definition() -> ModelDefinition {
    ModelDefinition::new("routeros", ">", |session: BoxedSession, options| {
        Box::new(RouterOs::new(session, options))
    })
}

/// Check RouterOS exec output for inline errors.
fn check_output(stdout: &str, stderr: &str) -> Result<()> {
    if !stderr.is_empty() {
        return Err(CommandError::failed(format!("SSH returned error: {}", stderr)).into());
    }
    if CLI_DUPLICATE_WARNINGS.iter().any(|w| stdout.contains(w)) {
        return Err(
            CommandError::failed(format!("SSH returned duplication warning: {}", stdout)).into(),
        );
    }
    if CLI_ERRORS.iter().any(|e| stdout.contains(e)) {
        return Err(CommandError::failed(format!("SSH returned error: {}", stdout)).into());
    }
    Ok(())
}

pub struct RouterOs<S = BoxedSession> {
    session: S,
    options: ModelOptions,
}

impl<S: Session> RouterOs<S> {
    pub fn new(session: S, options: ModelOptions) -> Self {
        Self { session, options }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Run `command` and fail on any known CLI error.
    pub async fn command(&mut self, command: &str) -> Result<String> {
        log_command(&self.options.hostname, command, false);
        let output = self.session.run(command, DEFAULT_COMMAND_TIMEOUT).await?;
        check_output(&output.stdout, &output.stderr)?;
        debug!("SSH:\n{}", output.stdout);
        Ok(output.stdout)
    }

    async fn resource_value(&mut self, key: &str) -> Result<String> {
        let stdout = self.command("/system resource print").await?;
        vertical_value(&stdout, key, ":").ok_or_else(|| {
            CommandError::failed(format!("'{}' missing from system resources", key)).into()
        })
    }

    /// `(current-firmware, upgrade-firmware)` of a routerboard.
    async fn routerboard_firmware(&mut self) -> Result<(String, String)> {
        let stdout = self.command("/system routerboard print").await?;
        let current = vertical_value(&stdout, "current-firmware", ":");
        let upgrade = vertical_value(&stdout, "upgrade-firmware", ":");
        match (current, upgrade) {
            (Some(current), Some(upgrade)) => Ok((current, upgrade)),
            _ => Err(CommandError::failed("routerboard firmware not reported").into()),
        }
    }

    /// Reboot and wait for the device to come back.
    async fn reboot(&mut self, command: &str) -> Result<()> {
        log_command(&self.options.hostname, command, false);
        // The exec channel usually dies with the device.
        if let Err(e) = self.session.run(command, DEFAULT_COMMAND_TIMEOUT).await {
            debug!("{}: {} ended with: {}", self.options.hostname, command, e);
        }
        self.session.expect_disconnect(self.options.reboot_timeout).await
    }

    /// Upgrade routerboard firmware to the version bundled with the
    /// installed RouterOS, if it differs.
    ///
    /// Devices without a routerboard report success.
    pub async fn upgrade_firmware(&mut self) -> Result<bool> {
        let (current, upgrade) = match self.routerboard_firmware().await {
            Ok(versions) => versions,
            Err(Error::Command(e)) => {
                debug!("{}: no routerboard firmware ({})", self.options.hostname, e);
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        if current == upgrade {
            info!("{}: Firmware already at {}", self.options.hostname, current);
            return Ok(true);
        }

        info!("{}: Upgrading firmware from {} to {}", self.options.hostname, current, upgrade);
        self.command("/system routerboard upgrade").await?;
        tokio::time::sleep(FIRMWARE_SETTLE).await;
        self.reboot("/system reboot").await?;

        let (current, upgrade) = self.routerboard_firmware().await?;
        Ok(current == upgrade)
    }

    /// Packages installed next to the main `routeros` package.
    pub async fn extra_packages(&mut self) -> Result<Vec<String>> {
        let data = self.command("/system/package print").await?;
        let packages = tabular(&data, &["#", "NAME", "VERSION"], " ", 0)?;
        Ok(packages
            .into_iter()
            .filter_map(|mut row| row.swap_remove("NAME"))
            .filter(|name| name != "routeros")
            .collect())
    }
}

fn local_only(image: &Image) -> Result<&LocalImage> {
    image.as_local().ok_or_else(|| {
        CommandError::UnsupportedImage {
            model: "routeros".to_string(),
            reason: format!("{} is not a local image", image.filename()),
        }
        .into()
    })
}

#[async_trait]
impl<S: Session> Model for RouterOs<S> {
    fn name(&self) -> &'static str {
        "routeros"
    }

    async fn platform(&mut self) -> Result<String> {
        self.resource_value("architecture-name").await
    }

    async fn software_version(&mut self) -> Result<String> {
        // "7.13.2 (stable)"
        let version = self.resource_value("version").await?;
        version
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| CommandError::failed("empty version").into())
    }

    async fn firmware_version(&mut self) -> Result<String> {
        match self.routerboard_firmware().await {
            Ok((current, _)) => Ok(current),
            // Non routerboard device
            Err(Error::Command(_)) => self.software_version().await,
            Err(e) => Err(e),
        }
    }

    fn supported_image_provider_types(&self) -> &'static [&'static str] {
        &["local"]
    }

    async fn save_config(&mut self, _dry_run: bool) -> Result<()> {
        // RouterOS persists configuration changes immediately.
        Ok(())
    }

    async fn upgrade(
        &mut self,
        image: &Image,
        extra_images: &[Image],
        dry_run: bool,
    ) -> Result<bool> {
        let mut uploads = Vec::with_capacity(extra_images.len() + 1);
        for extra in extra_images {
            uploads.push(local_only(extra)?);
        }
        uploads.push(local_only(image)?);

        if dry_run {
            for local in &uploads {
                info!("{}: Would upload {} (DRY RUN)", self.options.hostname, local.path.display());
            }
            return Ok(true);
        }

        for local in uploads {
            let data = local.read().await?;
            self.session.upload(&data, local.filename()).await?;
        }

        self.reboot("/system/reboot").await?;

        let upgraded = self.upgrade_firmware().await?;
        if !upgraded {
            warn!("{}: Firmware upgrade did not take effect", self.options.hostname);
        }
        Ok(upgraded)
    }

    async fn execute(&mut self, command: &str, dry_run: bool) -> Result<String> {
        if dry_run {
            log_command(&self.options.hostname, command, true);
            return Ok(String::new());
        }
        self.command(command).await
    }

    async fn upgrade_package_name(&mut self, version: &str) -> Result<String> {
        let platform = self.platform().await?;
        if version.starts_with('6') {
            return Ok(format!("routeros-{}-{}.npk", platform, version));
        }
        Ok(format!("routeros-{}-{}.npk", version, platform))
    }

    async fn extra_package_names(&mut self, version: &str) -> Result<Vec<String>> {
        let platform = self.platform().await?;
        Ok(self
            .extra_packages()
            .await?
            .into_iter()
            .map(|name| format!("{}-{}-{}.npk", name, version, platform))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeSession;

    const RESOURCES: &str = concat!(
        "                   uptime: 2w3d4h\n",
        "                  version: 7.12.1 (stable)\n",
        "        architecture-name: arm64\n",
        "                board-name: RB5009UG+S+\n",
    );

    const ROUTERBOARD: &str = concat!(
        "       routerboard: yes\n",
        "             model: RB5009UG+S+\n",
        "  current-firmware: 7.12.1\n",
        "  upgrade-firmware: 7.12.1\n",
    );

    const PACKAGES: &str = concat!(
        "Columns: NAME, VERSION\n",
        " #  NAME       VERSION\n",
        " 0  routeros   7.12.1\n",
        " 1  wifiwave2  7.12.1\n",
    );

    fn model(session: FakeSession) -> RouterOs<FakeSession> {
        RouterOs::new(session, ModelOptions::new("core-router"))
    }

    #[tokio::test]
    async fn test_versions_and_platform() {
        let mut model = model(
            FakeSession::new()
                .on("/system resource print", RESOURCES)
                .on("/system routerboard print", ROUTERBOARD),
        );

        assert_eq!(model.platform().await.unwrap(), "arm64");
        assert_eq!(model.software_version().await.unwrap(), "7.12.1");
        assert_eq!(model.firmware_version().await.unwrap(), "7.12.1");
    }

    #[tokio::test]
    async fn test_firmware_falls_back_on_non_routerboard() {
        let mut model = model(
            FakeSession::new()
                .on("/system resource print", RESOURCES)
                .on("/system routerboard print", "bad command name routerboard (line 1 column 9)"),
        );
        assert_eq!(model.firmware_version().await.unwrap(), "7.12.1");
    }

    #[tokio::test]
    async fn test_cli_error_is_command_error() {
        let mut model = model(
            FakeSession::new().on("/ip address add", "failure: already have such address"),
        );
        let err = model.execute("/ip address add", false).await.unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::Failed { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_execute_sends_nothing() {
        let mut model = model(FakeSession::new());
        assert_eq!(model.execute("/system reboot", true).await.unwrap(), "");
        assert!(model.session().commands.is_empty());
    }

    #[tokio::test]
    async fn test_package_names() {
        let mut model = model(
            FakeSession::new()
                .on("/system resource print", RESOURCES)
                .on("/system/package print", PACKAGES),
        );

        assert_eq!(
            model.upgrade_package_name("7.13").await.unwrap(),
            "routeros-7.13-arm64.npk"
        );
        assert_eq!(
            model.upgrade_package_name("6.49.10").await.unwrap(),
            "routeros-arm64-6.49.10.npk"
        );
        assert_eq!(
            model.extra_package_names("7.13").await.unwrap(),
            vec!["wifiwave2-7.13-arm64.npk"]
        );
    }

    #[tokio::test]
    async fn test_upgrade_uploads_extras_first_and_reboots() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("routeros-7.13-arm64.npk");
        let extra = dir.path().join("wifiwave2-7.13-arm64.npk");
        std::fs::write(&main, b"main").unwrap();
        std::fs::write(&extra, b"extra").unwrap();

        let mut model = model(
            FakeSession::new()
                .on_timeout("/system/reboot")
                .on("/system routerboard print", ROUTERBOARD),
        );

        let upgraded = model
            .upgrade(
                &Image::local(&main, "7.13", "arm64"),
                &[Image::local(&extra, "7.13", "arm64")],
                false,
            )
            .await
            .unwrap();

        assert!(upgraded);
        let session = model.session();
        let names: Vec<&str> = session.uploads.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["wifiwave2-7.13-arm64.npk", "routeros-7.13-arm64.npk"]);
        assert_eq!(session.uploads[1].1, b"main");
        assert_eq!(session.disconnects, 1);
    }

    #[tokio::test]
    async fn test_dry_run_upgrade_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("routeros-7.13-arm64.npk");

        let mut model = model(FakeSession::new());
        assert!(model.upgrade(&Image::local(&main, "7.13", "arm64"), &[], true).await.unwrap());

        let session = model.session();
        assert!(session.uploads.is_empty());
        assert!(session.commands.is_empty());
        assert_eq!(session.disconnects, 0);
    }

    #[tokio::test]
    async fn test_network_image_is_rejected() {
        use crate::image::NetworkImage;

        let mut model = model(FakeSession::new());
        let image = Image::network(
            NetworkImage::new("http", "files", "routeros.npk"),
            "7.13",
            "arm64",
        );
        let err = model.upgrade(&image, &[], false).await.unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::UnsupportedImage { .. })));
    }
}
