//! Connect to a device and print its platform and versions.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example show_version -- --host 192.168.88.1 --model routeros \
//!     --user admin --password secret
//! ```
//!
//! Telnet devices:
//! ```bash
//! cargo run --example show_version -- --host sw1 --model delln --telnet \
//!     --user admin --password secret
//! ```

use std::env;
use std::time::Duration;

use netcommand::{Model, ModelOptions, ModelRegistry, SessionBuilder, TransportKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let registry = ModelRegistry::with_builtin();

    let mut builder = SessionBuilder::new(&args.host)
        .username(&args.user)
        .prompt(registry.prompt(&args.model)?)
        .timeout(Duration::from_secs(args.timeout));
    if args.telnet {
        builder = builder.transport(TransportKind::Telnet);
    }
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }

    println!("Connecting to {}...", args.host);
    let session = builder.connect().await?;

    let mut options = ModelOptions::new(&args.host);
    if let Some(enable) = &args.enable_password {
        options = options.with_enable_password(enable);
    }
    let mut model = registry.create(&args.model, session, options)?;

    println!("Model:    {}", model.name());
    println!("Platform: {}", model.platform().await?);
    println!("Software: {}", model.software_version().await?);
    println!("Firmware: {}", model.firmware_version().await?);

    Ok(())
}

struct Args {
    host: String,
    model: String,
    user: String,
    password: Option<String>,
    enable_password: Option<String>,
    telnet: bool,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            host: "localhost".to_string(),
            model: "routeros".to_string(),
            user: env::var("USER").unwrap_or_else(|_| "admin".to_string()),
            password: None,
            enable_password: None,
            telnet: false,
            timeout: 30,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--host" | "-h" => parsed.host = value.unwrap_or(parsed.host),
                "--model" | "-m" => parsed.model = value.unwrap_or(parsed.model),
                "--user" | "-u" => parsed.user = value.unwrap_or(parsed.user),
                "--password" | "-P" => parsed.password = value,
                "--enable-password" => parsed.enable_password = value,
                "--timeout" | "-t" => {
                    parsed.timeout = value.and_then(|v| v.parse().ok()).unwrap_or(30)
                }
                "--telnet" => {
                    parsed.telnet = true;
                    i += 1;
                    continue;
                }
                other => eprintln!("Unknown argument: {}", other),
            }
            i += 2;
        }

        parsed
    }
}
