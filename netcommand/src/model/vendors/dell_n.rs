//! Dell Networking N-series (OS6) model.
//!
//! The switch is driven through an interactive shell. Privileged commands
//! need `enable` first, which changes the prompt from `>` to `#`. Images are
//! pulled by the switch itself into the backup slot and activated by a reload.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use secrecy::ExposeSecret;

use crate::channel::{Answer, AnswerTable, RowCallback, RowMatcher};
use crate::error::{CommandError, Error, Result};
use crate::image::{Image, NetworkImage};
use crate::model::parsers::{match_text, regex_value, tabular};
use crate::model::{
    BoxedSession, DEFAULT_COMMAND_TIMEOUT, Model, ModelDefinition, ModelOptions, log_command,
};
use crate::transport::Session;
use crate::version::compare;

const CLI_ERRORS: &[&str] = &["% Invalid input detected at"];

const VERSION_HEADER: &[&str] = &["unit", "active", "backup", "current-active", "next-active"];

const SHOW_VERSION_TIMEOUT: Duration = Duration::from_secs(30);
const COPY_TIMEOUT: Duration = Duration::from_secs(300);
const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

const PRIVILEGED_PROMPT: &str = "#";

pub fn definition() -> ModelDefinition {
    ModelDefinition::new("delln", ">", |session: BoxedSession, options| {
        Box::new(DellN::new(session, options))
    })
}

fn check_output(stdout: &str) -> Result<()> {
    match stdout
        .lines()
        .find(|row| CLI_ERRORS.iter().any(|e| row.contains(e)))
    {
        Some(row) => Err(CommandError::failed(row.trim()).into()),
        None => Ok(()),
    }
}

fn reload_answers() -> AnswerTable {
    AnswerTable::new()
        .reply("Are you sure you want to continue?", "y")
        .reply("Are you sure you want to reload the stack?", "y")
}

fn unsupported(reason: impl Into<String>) -> Error {
    CommandError::UnsupportedImage {
        model: "delln".to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Software versions per slot, as listed by `show version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Active,
    Backup,
    NextActive,
}

impl Slot {
    fn column(self) -> &'static str {
        match self {
            Slot::Active => "active",
            Slot::Backup => "backup",
            Slot::NextActive => "next-active",
        }
    }
}

pub struct DellN<S = BoxedSession> {
    session: S,
    options: ModelOptions,
}

impl<S: Session> DellN<S> {
    pub fn new(session: S, options: ModelOptions) -> Self {
        Self { session, options }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Send `command` to the shell regardless of dry run.
    async fn interactive(
        &mut self,
        command: &str,
        timeout: Duration,
        answers: Option<&AnswerTable>,
    ) -> Result<String> {
        log_command(&self.options.hostname, command, false);
        let callback = answers.map(|a| a as &dyn RowCallback);
        self.session
            .run_interactive(command, timeout, callback, None)
            .await
    }

    /// Like [`interactive`](Self::interactive), but only logs on dry run.
    async fn mutate(
        &mut self,
        command: &str,
        timeout: Duration,
        answers: Option<&AnswerTable>,
        dry_run: bool,
    ) -> Result<String> {
        if dry_run {
            log_command(&self.options.hostname, command, true);
            return Ok(String::new());
        }
        self.interactive(command, timeout, answers).await
    }

    async fn show_version(&mut self) -> Result<String> {
        self.interactive("show version", SHOW_VERSION_TIMEOUT, None).await
    }

    async fn slot_version(&mut self, slot: Slot) -> Result<String> {
        let stdout = self.show_version().await?;
        let mut units = tabular(&stdout, VERSION_HEADER, " ", 1)?;
        if units.is_empty() {
            return Err(CommandError::failed("no units in show version").into());
        }
        units.swap_remove(0).swap_remove(slot.column()).ok_or_else(|| {
            CommandError::failed(format!("'{}' column missing from show version", slot.column()))
                .into()
        })
    }

    /// Enter privileged mode.
    ///
    /// Without an enable password a `Password:` challenge aborts the command.
    pub async fn elevate(&mut self) -> Result<()> {
        let password = self
            .options
            .enable_password
            .as_ref()
            .map(|p| p.expose_secret().to_string());
        let answers = AnswerTable::new().with_entry(
            RowMatcher::Contains("Password:".to_string()),
            Answer::from(password),
        );

        self.session.wait_prompt(DEFAULT_COMMAND_TIMEOUT).await?;
        self.session.set_prompt(PRIVILEGED_PROMPT);
        let stdout = self
            .interactive("enable", DEFAULT_COMMAND_TIMEOUT, Some(&answers))
            .await?;
        check_output(&stdout)?;

        if !self.session.is_at_prompt() {
            return Err(CommandError::failed(format!(
                "{}: could not enter privileged mode",
                self.options.hostname
            ))
            .into());
        }
        Ok(())
    }

    /// Update the boot code and reload.
    pub async fn upgrade_bootcode(&mut self, dry_run: bool) -> Result<()> {
        self.elevate().await?;
        let stdout = self
            .mutate("update bootcode", DEFAULT_COMMAND_TIMEOUT, None, dry_run)
            .await?;
        check_output(&stdout)?;
        self.reload(dry_run).await?;
        if !dry_run {
            self.session.expect_disconnect(self.options.reboot_timeout).await?;
        }
        Ok(())
    }

    /// Issue `reload`. The switch drops the session while answering, so
    /// timeouts and disconnects are expected.
    async fn reload(&mut self, dry_run: bool) -> Result<()> {
        let answers = reload_answers();
        match self.mutate("reload", RELOAD_TIMEOUT, Some(&answers), dry_run).await {
            Ok(stdout) => check_output(&stdout),
            Err(e) if e.is_timeout() || e.is_disconnect() => {
                debug!("{}: reload ended with: {}", self.options.hostname, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Copy `location` into the backup slot and check the result.
    async fn copy_to_backup(
        &mut self,
        location: &NetworkImage,
        version: &str,
        answers: &AnswerTable,
        dry_run: bool,
    ) -> Result<()> {
        let command = format!("copy {} backup", location.url(false, true));
        let stdout = self.mutate(&command, COPY_TIMEOUT, Some(answers), dry_run).await?;
        if dry_run {
            return Ok(());
        }

        check_output(&stdout)?;
        if match_text(&stdout, "File transfer operation completed successfully.").is_none() {
            return Err(CommandError::failed(format!("Image upload failed: {}", stdout)).into());
        }

        let installed = self.slot_version(Slot::Backup).await?;
        if !same_version(&installed, version)? {
            return Err(CommandError::failed(format!(
                "backup image version {} didn't match expected {}",
                installed, version
            ))
            .into());
        }
        Ok(())
    }
}

fn same_version(a: &str, b: &str) -> Result<bool> {
    Ok(compare(a, b)?.is_eq())
}

#[async_trait]
impl<S: Session> Model for DellN<S> {
    fn name(&self) -> &'static str {
        "delln"
    }

    async fn platform(&mut self) -> Result<String> {
        let stdout = self.show_version().await?;
        let model_id = regex_value(&stdout, r"System Model ID\.+ (.+)$")?
            .ok_or_else(|| CommandError::failed("System Model ID missing from show version"))?;

        // N1548P -> N1500
        if model_id.starts_with('N')
            && let Some(family) = model_id.get(..3)
        {
            return Ok(format!("{}00", family));
        }
        Ok(model_id)
    }

    async fn software_version(&mut self) -> Result<String> {
        self.slot_version(Slot::Active).await
    }

    async fn firmware_version(&mut self) -> Result<String> {
        let stdout = self.show_version().await?;
        regex_value(&stdout, r"CPLD Version\.+ (.+)$")?
            .ok_or_else(|| CommandError::failed("CPLD Version missing from show version").into())
    }

    fn supported_image_provider_types(&self) -> &'static [&'static str] {
        &["tftp", "scp"]
    }

    async fn save_config(&mut self, dry_run: bool) -> Result<()> {
        let answers = AnswerTable::new().reply("Are you sure you want to save?", "y");

        self.elevate().await?;
        let stdout = self
            .mutate(
                "copy running-config startup-config",
                SHOW_VERSION_TIMEOUT,
                Some(&answers),
                dry_run,
            )
            .await?;
        if dry_run {
            return Ok(());
        }

        check_output(&stdout)?;
        if !stdout.contains("Configuration Saved!") {
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
        if !extra_images.is_empty() {
            return Err(unsupported("extra images are not supported"));
        }
        let location = image
            .as_network()
            .ok_or_else(|| unsupported(format!("{} is not a network image", image.filename())))?;

        let mut answers = AnswerTable::new()
            .reply("Are you sure you want to start?", "y")
            .reply("Are you sure you want to continue?", "y")
            .reply("Are you sure you want to reload the stack?", "y");
        if let Some(password) = &location.password {
            answers = answers.reply("Remote Password:", password.expose_secret());
        }

        let hostname = self.options.hostname.clone();
        let marker = if dry_run { " (DRY RUN)" } else { "" };

        self.elevate().await?;

        let backup = self.slot_version(Slot::Backup).await?;
        info!(
            "{}: Current version {}, image version {}{}",
            hostname, backup, image.version, marker
        );
        if same_version(&backup, &image.version)? {
            info!("{}: Backup image already at expected version", hostname);
        } else {
            info!("{}: Upgrading from {} to {}{}", hostname, backup, image.version, marker);
            self.copy_to_backup(location, &image.version, &answers, dry_run)
                .await?;
        }

        let mut next = self.slot_version(Slot::NextActive).await?;
        if !same_version(&next, &image.version)? {
            let stdout = self
                .mutate("boot system backup", DEFAULT_COMMAND_TIMEOUT, None, dry_run)
                .await?;
            check_output(&stdout)?;
            next = self.slot_version(Slot::NextActive).await?;
        }
        if !dry_run && !same_version(&next, &image.version)? {
            return Err(CommandError::failed(format!(
                "boot image version {} didn't match expected {}",
                next, image.version
            ))
            .into());
        }

        self.reload(dry_run).await?;
        if dry_run {
            return Ok(true);
        }

        tokio::time::sleep(self.options.reload_delay).await;
        self.session.expect_disconnect(self.options.reboot_timeout).await?;
        Ok(true)
    }

    async fn execute(&mut self, command: &str, dry_run: bool) -> Result<String> {
        let stdout = self
            .mutate(command, DEFAULT_COMMAND_TIMEOUT, None, dry_run)
            .await?;
        check_output(&stdout)?;
        Ok(stdout)
    }

    async fn upgrade_package_name(&mut self, version: &str) -> Result<String> {
        let platform = self.platform().await?;
        Ok(format!("{}v{}.stk", platform, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fake::FakeSession;

    fn show_version(active: &str, backup: &str, next_active: &str) -> String {
        format!(
            "Machine Description............... Dell EMC Networking Switch\n\
             System Model ID................... N1548P\n\
             CPLD Version...................... 17\n\
             \n\
             unit active      backup      current-active next-active\n\
             ---- ----------- ----------- -------------- --------------\n\
             1    {active}     {backup}     {active}        {next_active}\n"
        )
    }

    fn options() -> ModelOptions {
        let mut options = ModelOptions::new("sw1").with_enable_password("enable-secret");
        options.reload_delay = Duration::ZERO;
        options
    }

    fn tftp_image() -> Image {
        Image::network(
            NetworkImage::new("tftp", "192.0.2.10", "images/N1500v6.7.1.6.stk"),
            "6.7.1.6",
            "N1500",
        )
    }

    #[tokio::test]
    async fn test_platform_and_versions() {
        let session = FakeSession::new().on(
            "show version",
            &show_version("6.6.3.1", "6.5.4.4", "6.6.3.1"),
        );
        let mut model = DellN::new(session, options());

        assert_eq!(model.platform().await.unwrap(), "N1500");
        assert_eq!(model.software_version().await.unwrap(), "6.6.3.1");
        assert_eq!(model.firmware_version().await.unwrap(), "17");
        assert_eq!(model.upgrade_package_name("6.7.1.6").await.unwrap(), "N1500v6.7.1.6.stk");
    }

    #[tokio::test]
    async fn test_elevate_answers_password_and_switches_prompt() {
        let session = FakeSession::new().on_asking("enable", &["Password:"], "");
        let mut model = DellN::new(session, options());

        model.elevate().await.unwrap();
        assert_eq!(model.session().replies, vec!["enable-secret"]);
        assert_eq!(model.session().prompts, vec!["#"]);
    }

    #[tokio::test]
    async fn test_elevate_without_password_fails() {
        let session = FakeSession::new().on_asking("enable", &["Password:"], "");
        let mut model = DellN::new(session, ModelOptions::new("sw1"));

        let err = model.elevate().await.unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::Failed { .. })));
        assert!(model.session().replies.is_empty());
    }

    #[tokio::test]
    async fn test_save_config_confirms() {
        let session = FakeSession::new().on("enable", "").on_asking(
            "copy running-config startup-config",
            &["Are you sure you want to save? (y/n)"],
            "Configuration Saved!",
        );
        let mut model = DellN::new(session, options());

        model.save_config(false).await.unwrap();
        assert_eq!(model.session().replies, vec!["y"]);
    }

    #[tokio::test]
    async fn test_save_config_not_confirmed() {
        let session = FakeSession::new()
            .on("enable", "")
            .on("copy running-config startup-config", "Aborted");
        let mut model = DellN::new(session, options());

        assert!(model.save_config(false).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_input_is_command_error() {
        let session = FakeSession::new().on(
            "shw run",
            "shw run\n     ^\n% Invalid input detected at '^' marker.\n",
        );
        let mut model = DellN::new(session, options());

        let err = model.execute("shw run", false).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command error: Command failed: % Invalid input detected at '^' marker."
        );
    }

    #[tokio::test]
    async fn test_upgrade_copies_boots_and_reloads() {
        let session = FakeSession::new()
            .on("enable", "")
            .on("show version", &show_version("6.6.3.1", "6.5.4.4", "6.6.3.1"))
            .on("show version", &show_version("6.6.3.1", "6.7.1.6", "6.6.3.1"))
            .on("show version", &show_version("6.6.3.1", "6.7.1.6", "6.6.3.1"))
            .on("show version", &show_version("6.6.3.1", "6.7.1.6", "6.7.1.6"))
            .on_asking(
                "copy tftp://192.0.2.10/images/N1500v6.7.1.6.stk backup",
                &["Are you sure you want to start? (y/n)"],
                "File transfer operation completed successfully.",
            )
            .on("boot system backup", "")
            .on_asking("reload", &["Are you sure you want to reload the stack? (y/n)"], "");
        let mut model = DellN::new(session, options());

        assert!(model.upgrade(&tftp_image(), &[], false).await.unwrap());

        let session = model.session();
        assert_eq!(
            session.mutating_commands(),
            vec![
                "copy tftp://192.0.2.10/images/N1500v6.7.1.6.stk backup",
                "boot system backup",
                "reload",
            ]
        );
        assert_eq!(session.replies, vec!["y", "y"]);
        assert_eq!(session.disconnects, 1);
    }

    #[tokio::test]
    async fn test_upgrade_skips_copy_when_backup_current() {
        let session = FakeSession::new()
            .on("enable", "")
            .on("show version", &show_version("6.6.3.1", "6.7.1.6", "6.7.1.6"))
            .on_timeout("reload");
        let mut model = DellN::new(session, options());

        assert!(model.upgrade(&tftp_image(), &[], false).await.unwrap());
        assert_eq!(model.session().mutating_commands(), vec!["reload"]);
    }

    #[tokio::test]
    async fn test_dry_run_upgrade_only_queries() {
        let session = FakeSession::new()
            .on("enable", "")
            .on("show version", &show_version("6.6.3.1", "6.5.4.4", "6.6.3.1"));
        let mut model = DellN::new(session, options());

        assert!(model.upgrade(&tftp_image(), &[], true).await.unwrap());

        let session = model.session();
        assert!(session.mutating_commands().is_empty());
        assert_eq!(session.disconnects, 0);
    }

    #[tokio::test]
    async fn test_upgrade_rejects_local_and_extra_images() {
        let mut model = DellN::new(FakeSession::new(), options());

        let local = Image::local("/tmp/N1500v6.7.1.6.stk", "6.7.1.6", "N1500");
        let err = model.upgrade(&local, &[], false).await.unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::UnsupportedImage { .. })));

        let err = model.upgrade(&tftp_image(), &[tftp_image()], false).await.unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::UnsupportedImage { .. })));
        assert!(model.session().commands.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_bootcode_reloads() {
        let session = FakeSession::new()
            .on("enable", "")
            .on("update bootcode", "")
            .on_timeout("reload");
        let mut model = DellN::new(session, options());

        model.upgrade_bootcode(false).await.unwrap();
        assert_eq!(model.session().mutating_commands(), vec!["update bootcode", "reload"]);
        assert_eq!(model.session().disconnects, 1);
    }
}
