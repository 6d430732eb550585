//! Upgrade images and the providers that locate them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, error};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{ImageError, Result};

/// An upgrade artifact for one platform.
#[derive(Debug, Clone)]
pub struct Image {
    /// Software version the image installs.
    pub version: String,

    /// Platform the image is built for; must equal the device's platform.
    pub platform: String,

    /// Where the image lives.
    pub source: ImageSource,
}

/// Location of an image.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// File on the machine running the upgrade, pushed to the device.
    Local(LocalImage),

    /// File on a server the device fetches from.
    Network(NetworkImage),
}

impl Image {
    /// Image stored on the local filesystem.
    pub fn local(
        path: impl Into<PathBuf>,
        version: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            platform: platform.into(),
            source: ImageSource::Local(LocalImage { path: path.into() }),
        }
    }

    /// Image served over the network.
    pub fn network(
        location: NetworkImage,
        version: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            platform: platform.into(),
            source: ImageSource::Network(location),
        }
    }

    /// File name without directories.
    pub fn filename(&self) -> &str {
        match &self.source {
            ImageSource::Local(local) => local.filename(),
            ImageSource::Network(network) => network.filename(),
        }
    }

    /// The local file, if this is a local image.
    pub fn as_local(&self) -> Option<&LocalImage> {
        match &self.source {
            ImageSource::Local(local) => Some(local),
            ImageSource::Network(_) => None,
        }
    }

    /// The remote location, if this is a network image.
    pub fn as_network(&self) -> Option<&NetworkImage> {
        match &self.source {
            ImageSource::Network(network) => Some(network),
            ImageSource::Local(_) => None,
        }
    }
}

/// Image file on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    pub path: PathBuf,
}

impl LocalImage {
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Load the whole file.
    pub async fn read(&self) -> Result<Vec<u8>> {
        debug!("Reading image {}", self.path.display());
        let data = tokio::fs::read(&self.path).await.map_err(ImageError::Io)?;
        Ok(data)
    }
}

/// Image on a TFTP, SCP or HTTP server.
#[derive(Debug, Clone)]
pub struct NetworkImage {
    /// URL scheme, e.g. `tftp`, `scp`, `http`.
    pub protocol: String,

    pub server: String,

    /// Path on the server.
    pub path: String,

    pub username: Option<String>,

    pub password: Option<SecretString>,

    pub port: Option<u16>,
}

impl NetworkImage {
    /// Location without credentials or explicit port.
    pub fn new(
        protocol: impl Into<String>,
        server: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            server: server.into(),
            path: path.into(),
            username: None,
            password: None,
            port: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<SecretString>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn filename(&self) -> &str {
        basename(&self.path)
    }

    /// Render `protocol://[user[:password]@]server[:port]/path`.
    ///
    /// The password is only included when `credentials` is set; the user
    /// name is always included when known. Devices that take the password
    /// at an interactive prompt are given a URL built with
    /// `credentials = false`.
    pub fn url(&self, credentials: bool, skip_port: bool) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(password)) if credentials => {
                format!("{}:{}@", user, password.expose_secret())
            }
            (Some(user), _) => format!("{}@", user),
            _ => String::new(),
        };
        let port = match self.port {
            Some(port) if !skip_port => format!(":{}", port),
            _ => String::new(),
        };
        format!(
            "{}://{}{}{}/{}",
            self.protocol,
            auth,
            self.server,
            port,
            self.path.trim_start_matches('/')
        )
    }

    /// Whether the protocol is plain or secure HTTP.
    pub fn is_http(&self) -> bool {
        matches!(self.protocol.as_str(), "http" | "https")
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Source of upgrade images.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider kind, matched against a model's supported image provider types.
    fn kind(&self) -> &str;

    /// Look up `filename`, tagging the result with `version` and `platform`.
    ///
    /// Returns `Ok(None)` when the provider does not have the file.
    async fn find_image(&self, filename: &str, version: &str, platform: &str)
    -> Result<Option<Image>>;
}

/// Finds images in a local directory.
///
/// `filename` may contain glob wildcards but must match exactly one file.
#[derive(Debug, Clone)]
pub struct LocalImageProvider {
    directory: PathBuf,
}

impl LocalImageProvider {
    /// Search `directory`; a leading `~/` expands to the home directory.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: expand_home(directory.as_ref()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[async_trait]
impl ImageProvider for LocalImageProvider {
    fn kind(&self) -> &str {
        "local"
    }

    async fn find_image(
        &self,
        filename: &str,
        version: &str,
        platform: &str,
    ) -> Result<Option<Image>> {
        let pattern = self.directory.join(filename);
        let pattern = pattern.to_string_lossy();

        let mut files = Vec::new();
        for entry in glob::glob(&pattern).map_err(ImageError::Pattern)? {
            match entry {
                Ok(path) => files.push(path),
                Err(e) => debug!("Skipping unreadable path while searching images: {}", e),
            }
        }

        match files.len() {
            0 => {
                error!("Failed to find upgrade image {}", filename);
                Ok(None)
            }
            1 => Ok(files.pop().map(|path| Image::local(path, version, platform))),
            _ => Err(ImageError::Ambiguous {
                filename: filename.to_string(),
                directory: self.directory.display().to_string(),
            }
            .into()),
        }
    }
}
