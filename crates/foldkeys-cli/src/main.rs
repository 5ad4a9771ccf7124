//! foldkeys: folder key management CLI
//!
//! Commands:
//!   config show                      - display current configuration
//!   device new                       - enroll a device key pair for a user
//!   folder rekey <history>           - append a new key generation
//!   folder provision <history>       - grant the latest generation to new devices
//!   folder show <history>            - list generations, members and devices
//!   folder recover <history>         - recover a generation key on this device

mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use foldkeys_bundle::{
    recover_crypt_key, recover_generation_key, register_server_halves, DeviceKeyMap,
    FolderKeyGenerations, MemoryKeyServer, ServerKeyMap, TlfKeyBundle,
};
use foldkeys_core::config::FoldkeysConfig;
use foldkeys_core::{KeyGen, UserId};
use foldkeys_crypto::encoding::b64_encode;
use foldkeys_crypto::{Crypto, StandardCrypto};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "foldkeys",
    version,
    about = "Folder key bundle management",
    long_about = "foldkeys: rotate, provision and recover the split keys protecting a shared folder"
)]
struct Cli {
    /// Path to foldkeys.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "FOLDKEYS_CONFIG",
        default_value = "~/.config/foldkeys/foldkeys.toml"
    )]
    config: PathBuf,

    /// Log level or filter directive (overrides config)
    #[arg(long, env = "FOLDKEYS_LOG")]
    log: Option<String>,

    /// Log output format (overrides config)
    #[arg(long, env = "FOLDKEYS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Device enrollment
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Folder key generations
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum DeviceAction {
    /// Generate a device key pair and register its public key in the directory
    New {
        /// User the device belongs to
        #[arg(long, short = 'u')]
        user: String,
        /// Where to write the device private key (must not exist)
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum FolderAction {
    /// Append a new key generation provisioned for every registered device of the members
    Rekey {
        /// Folder history JSON file (created if missing)
        history: PathBuf,
        /// Users with write access
        #[arg(long = "writer", short = 'w', required = true)]
        writers: Vec<String>,
        /// Users with read-only access
        #[arg(long = "reader", short = 'r')]
        readers: Vec<String>,
    },

    /// Provision directory devices of current members that have no key entry yet
    ///
    /// The latest generation key is recovered through an already authorized device.
    Provision {
        /// Folder history JSON file
        history: PathBuf,
        /// User owning the authorizing device
        #[arg(long, short = 'u')]
        user: String,
        /// Private key file of the authorizing device
        #[arg(long)]
        device_key: PathBuf,
    },

    /// Show generations, members and device ids
    Show {
        /// Folder history JSON file
        history: PathBuf,
    },

    /// Recover a generation key and print its fingerprint
    Recover {
        /// Folder history JSON file
        history: PathBuf,
        #[arg(long, short = 'u')]
        user: String,
        /// Private key file of this device
        #[arg(long)]
        device_key: PathBuf,
        /// Generation to recover (default: latest)
        #[arg(long, short = 'g')]
        generation: Option<KeyGen>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = FoldkeysConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or(match config.logging.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(&level, &format);

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        Commands::Device { action: DeviceAction::New { user, out } } => {
            cmd_device_new(&config, &UserId::new(user), &out).await
        }
        Commands::Folder { action } => match action {
            FolderAction::Rekey { history, writers, readers } => {
                let writers: Vec<UserId> = writers.into_iter().map(UserId::new).collect();
                let readers: Vec<UserId> = readers.into_iter().map(UserId::new).collect();
                cmd_folder_rekey(&config, &history, &writers, &readers).await
            }
            FolderAction::Provision { history, user, device_key } => {
                cmd_folder_provision(&config, &history, &UserId::new(user), &device_key).await
            }
            FolderAction::Show { history } => cmd_folder_show(&history).await,
            FolderAction::Recover { history, user, device_key, generation } => {
                cmd_folder_recover(&config, &history, &UserId::new(user), &device_key, generation)
                    .await
            }
        },
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Local stand-ins for the key server and the user → device directory.
struct Stores {
    key_server_path: PathBuf,
    directory_path: PathBuf,
    key_server: MemoryKeyServer,
    directory: DeviceKeyMap,
}

impl Stores {
    async fn open(config: &FoldkeysConfig) -> Result<Self> {
        let key_server_path = expand_tilde(&config.store.key_server);
        let directory_path = expand_tilde(&config.store.directory);
        let key_server = store::read_json_or_default(&key_server_path).await?;
        let directory = store::read_json_or_default(&directory_path).await?;
        Ok(Self {
            key_server_path,
            directory_path,
            key_server,
            directory,
        })
    }

    /// Directory entries for `users`, skipping users with no registered device.
    fn device_keys<'a>(&self, users: impl IntoIterator<Item = &'a UserId>) -> DeviceKeyMap {
        let mut keys = DeviceKeyMap::new();
        for user in users {
            match self.directory.get(user) {
                Some(devices) if !devices.is_empty() => {
                    keys.insert(user.clone(), devices.clone());
                }
                _ => tracing::warn!(%user, "no registered devices; skipping"),
            }
        }
        keys
    }

    async fn save_key_server(&self) -> Result<()> {
        store::write_json(&self.key_server_path, &self.key_server).await
    }
}

fn device_count(maps: &[&DeviceKeyMap]) -> usize {
    maps.iter().flat_map(|m| m.values()).map(Vec::len).sum()
}

fn provisioned_count(server_keys: &ServerKeyMap) -> usize {
    server_keys.values().map(BTreeMap::len).sum()
}

async fn load_history(path: &Path) -> Result<FolderKeyGenerations> {
    store::read_json_or_default(path).await
}

// ── `foldkeys config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &FoldkeysConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `foldkeys device new` ─────────────────────────────────────────────────────

async fn cmd_device_new(config: &FoldkeysConfig, user: &UserId, out: &Path) -> Result<()> {
    if tokio::fs::try_exists(out)
        .await
        .with_context(|| format!("checking {}", out.display()))?
    {
        anyhow::bail!("refusing to overwrite existing key file: {}", out.display());
    }

    let mut stores = Stores::open(config).await?;
    let (public, private) = StandardCrypto
        .make_device_key_pair()
        .context("generating device key pair")?;

    store::create_device_key(out, &private).await?;
    stores.directory.entry(user.clone()).or_default().push(public);
    store::write_json(&stores.directory_path, &stores.directory).await?;

    tracing::info!(%user, device = %public.kid(), "device enrolled");
    println!("device:     {}", public.kid());
    println!("user:       {user}");
    println!("public key: {}", public.to_base64());
    println!("key file:   {}", out.display());
    Ok(())
}

// ── `foldkeys folder rekey` ───────────────────────────────────────────────────

async fn cmd_folder_rekey(
    config: &FoldkeysConfig,
    history_path: &Path,
    writers: &[UserId],
    readers: &[UserId],
) -> Result<()> {
    let mut history = load_history(history_path).await?;
    let mut stores = Stores::open(config).await?;
    let crypto = StandardCrypto;

    let writer_keys = stores.device_keys(writers);
    let reader_keys = stores.device_keys(readers);
    if writer_keys.is_empty() {
        anyhow::bail!("none of the writers has a registered device");
    }

    let (tlf_public_key, _tlf_private_key, crypt_key) = crypto
        .make_random_tlf_keys()
        .context("generating folder keys")?;
    let (e_pub, e_priv) = crypto
        .make_ephemeral_key_pair()
        .context("generating ephemeral key pair")?;

    let mut bundle = TlfKeyBundle::new(tlf_public_key);
    let parallel = config
        .provisioning
        .use_parallel(device_count(&[&writer_keys, &reader_keys]));
    let server_keys = if parallel {
        bundle.fill_in_devices_par(&crypto, &writer_keys, &reader_keys, e_pub, &e_priv, &crypt_key)
    } else {
        bundle.fill_in_devices(&crypto, &writer_keys, &reader_keys, e_pub, &e_priv, &crypt_key)
    }
    .context("provisioning devices")?;

    register_server_halves(&crypto, &mut stores.key_server, &server_keys)
        .context("registering server halves")?;
    // server halves first: a saved history must never point at missing halves
    stores.save_key_server().await?;
    let generation = history.push(bundle);
    store::write_json(history_path, &history).await?;

    tracing::info!(generation, "folder rekeyed");
    println!(
        "generation {generation}: {} device(s) provisioned, key fingerprint {}",
        provisioned_count(&server_keys),
        crypt_key.fingerprint()
    );
    Ok(())
}

// ── `foldkeys folder provision` ───────────────────────────────────────────────

async fn cmd_folder_provision(
    config: &FoldkeysConfig,
    history_path: &Path,
    user: &UserId,
    device_key_path: &Path,
) -> Result<()> {
    let mut history = load_history(history_path).await?;
    let mut stores = Stores::open(config).await?;
    let device_key = store::read_device_key(device_key_path).await?;
    let crypto = StandardCrypto;

    let generation = history.current_generation();
    let bundle = history
        .latest_mut()
        .with_context(|| format!("{} has no key generations", history_path.display()))?;

    let crypt_key = recover_crypt_key(&crypto, &stores.key_server, bundle, user, &device_key)
        .context("recovering the latest generation key")?;

    let writers: Vec<UserId> = bundle.writers().cloned().collect();
    let readers: Vec<UserId> = bundle.readers().cloned().collect();
    let writer_keys = stores.device_keys(&writers);
    let reader_keys = stores.device_keys(&readers);

    let (e_pub, e_priv) = crypto
        .make_ephemeral_key_pair()
        .context("generating ephemeral key pair")?;
    let parallel = config
        .provisioning
        .use_parallel(device_count(&[&writer_keys, &reader_keys]));
    let server_keys = if parallel {
        bundle.fill_in_devices_par(&crypto, &writer_keys, &reader_keys, e_pub, &e_priv, &crypt_key)
    } else {
        bundle.fill_in_devices(&crypto, &writer_keys, &reader_keys, e_pub, &e_priv, &crypt_key)
    }
    .context("provisioning devices")?;

    register_server_halves(&crypto, &mut stores.key_server, &server_keys)
        .context("registering server halves")?;
    stores.save_key_server().await?;
    store::write_json(history_path, &history).await?;

    tracing::info!(generation, provisioned = provisioned_count(&server_keys), "devices provisioned");
    println!(
        "generation {generation}: {} new device(s) provisioned",
        provisioned_count(&server_keys)
    );
    Ok(())
}

// ── `foldkeys folder show` ────────────────────────────────────────────────────

async fn cmd_folder_show(history_path: &Path) -> Result<()> {
    let history = load_history(history_path).await?;
    println!("folder:     {}", history_path.display());
    println!("generation: {}", history.current_generation());

    for (generation, bundle) in history.iter() {
        println!();
        println!("── generation {generation} ──");
        println!("  public key:      {}", b64_encode(bundle.tlf_public_key().as_bytes()));
        println!(
            "  ephemeral keys:  {}",
            bundle.writer().ephemeral_public_keys().len()
        );
        for (role, users) in [
            ("writer", bundle.writer().writer_keys()),
            ("reader", bundle.reader().reader_keys()),
        ] {
            for (user, devices) in users {
                let ids: Vec<String> = devices.device_ids().iter().map(|d| d.to_hex()).collect();
                println!("  {role} {user}: {}", ids.join(", "));
            }
        }
    }
    Ok(())
}

// ── `foldkeys folder recover` ─────────────────────────────────────────────────

async fn cmd_folder_recover(
    config: &FoldkeysConfig,
    history_path: &Path,
    user: &UserId,
    device_key_path: &Path,
    generation: Option<KeyGen>,
) -> Result<()> {
    let history = load_history(history_path).await?;
    let stores = Stores::open(config).await?;
    let device_key = store::read_device_key(device_key_path).await?;

    let generation = generation.unwrap_or_else(|| history.current_generation());
    let crypt_key = recover_generation_key(
        &StandardCrypto,
        &stores.key_server,
        &history,
        generation,
        user,
        &device_key,
    )
    .with_context(|| format!("recovering generation {generation}"))?;

    println!("generation {generation}: key fingerprint {}", crypt_key.fingerprint());
    Ok(())
}
