use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use tiktok_reup::auth;
use tiktok_reup::config::AppConfig;
use tiktok_reup::credentials;
use tiktok_reup::db::{self, DynError};
use tiktok_reup::models::{AccountStatus, Role};
use tiktok_reup::serve::serve_app;
use tiktok_reup::tiktok::{parse_user_input, LiveProbe, TikTokClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Re-upload videos and record TikTok live broadcasts")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web application and live monitor
    Serve {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create an approved account from the command line
    CreateUser {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        username: String,

        #[arg(short = 'P', long)]
        password: String,

        /// Give the account the admin role
        #[arg(long)]
        admin: bool,
    },
    /// Check once whether a TikTok account is live
    CheckLive {
        /// Path to config file (TOML format)
        #[arg(short, long)]
        config: PathBuf,

        /// Username, @username or profile URL
        user: String,
    },
}

fn main() -> Result<(), DynError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match args.command {
        Command::Serve { config, port } => {
            let mut config = load_config(&config)?;
            if let Some(port) = port {
                config.port = port;
            }
            serve_app(config)
        }
        Command::CreateUser {
            config,
            username,
            password,
            admin,
        } => create_user(load_config(&config)?, &username, &password, admin),
        Command::CheckLive { config, user } => check_live(load_config(&config)?, &user),
    }
}

fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = AppConfig::load(path)?;
    config.validate()?;
    config.resolve_paths()?;
    Ok(config)
}

fn create_user(
    config: AppConfig,
    username: &str,
    password: &str,
    admin: bool,
) -> Result<(), DynError> {
    let role = if admin { Role::Admin } else { Role::User };
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let pool = db::open_database(&config.database_path).await?;
        db::init_database_schema(&pool).await?;
        let user = auth::create_user(&pool, username, password, role, AccountStatus::Approved)
            .await
            .map_err(|e| e.to_string())?;
        println!(
            "Created {} account '{}' (id {})",
            user.role.as_str(),
            user.username,
            user.id
        );
        Ok::<(), DynError>(())
    })
}

fn check_live(config: AppConfig, input: &str) -> Result<(), DynError> {
    let (username, room_id) = parse_user_input(input)?;
    let creds = credentials::load_credentials()?;
    let cookies = credentials::tiktok_cookies(&creds, config.tiktok.credential_profile.as_deref())?;
    let client = TikTokClient::new(&config.tiktok, &cookies)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let room_id = match room_id {
            Some(id) => id,
            None => match client.resolve_room_id(&username).await? {
                Some(id) => id,
                None => return Err(format!("Could not find user: {}", username).into()),
            },
        };
        println!("@{} room: {}", username, room_id);

        if client.is_live(&room_id).await? {
            println!("Status: live");
            println!("Stream: {}", client.stream_url(&room_id).await?);
        } else {
            println!("Status: offline");
        }
        Ok::<(), DynError>(())
    })
}
