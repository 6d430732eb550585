//! Upgrade one device from images in a local directory and print the
//! report row as JSON.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example upgrade_host -- --host 192.168.88.1 --user admin --password secret \
//!     --version 7.13.2 --images ~/images --dry-run
//! ```
//!
//! Drop `--dry-run` to actually install the image. The device reboots.

use std::env;

use netcommand::{ImageProvider, LocalImageProvider, ModelOptions, ModelRegistry, SessionBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Authenticate with the given credentials only, not a running agent.
    // SAFETY: single-threaded, the runtime is not started yet.
    unsafe { netcommand::transport::clear_agent_socket() };

    let args = Args::parse();
    tokio::runtime::Runtime::new()?.block_on(run(args))
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = ModelRegistry::with_builtin();

    let mut builder = SessionBuilder::new(&args.host)
        .username(&args.user)
        .prompt(registry.prompt(&args.model)?);
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    let session = builder.connect().await?;

    let mut model = registry.create(&args.model, session, ModelOptions::new(&args.host))?;
    let providers: Vec<Box<dyn ImageProvider>> =
        vec![Box::new(LocalImageProvider::new(&args.images))];

    let result = netcommand::update_host(
        model.as_mut(),
        &args.host,
        &args.version,
        &providers,
        args.dry_run,
    )
    .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

struct Args {
    host: String,
    model: String,
    user: String,
    password: Option<String>,
    version: String,
    images: String,
    dry_run: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            host: "localhost".to_string(),
            model: "routeros".to_string(),
            user: env::var("USER").unwrap_or_else(|_| "admin".to_string()),
            password: None,
            version: String::new(),
            images: "~/images".to_string(),
            dry_run: false,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match args[i].as_str() {
                "--host" | "-h" => parsed.host = value.unwrap_or(parsed.host),
                "--model" | "-m" => parsed.model = value.unwrap_or(parsed.model),
                "--user" | "-u" => parsed.user = value.unwrap_or(parsed.user),
                "--password" | "-P" => parsed.password = value,
                "--version" | "-v" => parsed.version = value.unwrap_or_default(),
                "--images" | "-i" => parsed.images = value.unwrap_or(parsed.images),
                "--dry-run" | "-n" => {
                    parsed.dry_run = true;
                    i += 1;
                    continue;
                }
                other => eprintln!("Unknown argument: {}", other),
            }
            i += 2;
        }

        if parsed.version.is_empty() {
            eprintln!("Error: --version is required");
            std::process::exit(1);
        }
        parsed
    }
}
