use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod auth;

use bitwill_vault::backup::{self, needs_password, to_numbered_text};
use bitwill_vault::config::ConfigOverrides;
use bitwill_vault::document::format_file_size;
use bitwill_vault::password::DEFAULT_GENERATED_LENGTH;
use bitwill_vault::session::SessionState;
use bitwill_vault::{
    decode_qr_payload,
    encode_qr_payload,
    format_btc,
    generate_secure_password,
    to_satoshis,
    validate_mnemonic,
    validate_password,
    Account,
    BackupCodec,
    Branch,
    DocumentCipher,
    EncryptedFileStore,
    EncryptedPackage,
    JsonFileStore,
    MnemonicStrength,
    Network,
    NonceMixing,
    SecureMnemonic,
    SessionConfig,
    VaultConfig,
    VaultError,
    Wallet,
    WalletSession,
    WalletStore,
};

#[derive(Debug, Parser)]
#[command(name = "bitwill")]
#[command(
    version,
    about = "Offline seed phrase, HD wallet and document encryption toolkit."
)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true, value_name = "PATH", env = "BITWILL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the wallet store
    #[arg(long, global = true, value_name = "PATH", env = "BITWILL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Bitcoin network: main or test
    #[arg(long, global = true)]
    network: Option<Network>,

    /// Log debug output to stderr
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generates and checks BIP-39 seed phrases
    #[command(subcommand)]
    Mnemonic(MnemonicCommand),

    /// Creates, imports and inspects the stored wallet
    #[command(subcommand)]
    Wallet(WalletCommand),

    /// Exports and imports seed phrase backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Password-protected QR payloads for the seed phrase
    #[command(subcommand)]
    Qr(QrCommand),

    /// Encrypts and decrypts documents
    #[command(subcommand)]
    Document(DocumentCommand),

    /// Password strength checks and generation
    #[command(subcommand)]
    Password(PasswordCommand),

    /// BTC and satoshi conversion
    #[command(subcommand)]
    Btc(BtcCommand),
}

#[derive(Debug, Subcommand)]
enum MnemonicCommand {
    /// Prints a new seed phrase
    Generate {
        #[arg(long, default_value_t = 12)]
        words: usize,

        /// Extra user-supplied entropy mixed into the OS randomness
        #[arg(long)]
        nonce: Option<String>,

        #[arg(long, default_value_t = 5)]
        complexity: u8,

        #[arg(long, default_value_t = 100)]
        iterations: u16,
    },

    /// Exits with 0 if the phrase is a valid English BIP-39 mnemonic
    #[command(arg_required_else_help = true)]
    Validate {
        #[arg(num_args = 1.., required = true)]
        phrase: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum WalletCommand {
    /// Generates a seed, checks the backup and saves the wallet
    Create {
        #[arg(long, default_value_t = 12)]
        words: usize,

        /// Number of accounts to derive
        #[arg(long)]
        accounts: Option<u32>,

        /// Answer the backup challenge automatically
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },

    /// Restores a wallet from a seed phrase file, or `-` for stdin
    #[command(arg_required_else_help = true)]
    Import {
        source: String,

        #[arg(long)]
        accounts: Option<u32>,
    },

    /// Prints the stored wallet's accounts
    Show {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Derives and saves the next account
    AddAccount,

    /// Re-derives all accounts on the external or internal chain
    #[command(arg_required_else_help = true)]
    Branch { branch: Branch },

    /// Deletes the stored wallet
    Reset {
        #[arg(short, long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    /// Writes an encrypted JSON backup of the seed phrase
    #[command(arg_required_else_help = true)]
    ExportJson { out: PathBuf },

    /// Writes the seed phrase as numbered plain text
    #[command(arg_required_else_help = true)]
    ExportText { out: PathBuf },

    /// Restores the wallet from a JSON, legacy or plain text backup
    #[command(arg_required_else_help = true)]
    Import {
        file: PathBuf,

        #[arg(long)]
        accounts: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
enum QrCommand {
    /// Prints the stored seed phrase as an encrypted QR payload
    Encode,

    /// Decrypts a QR payload
    #[command(arg_required_else_help = true)]
    Decode { payload: String },
}

#[derive(Debug, Subcommand)]
enum DocumentCommand {
    /// Encrypts a file into a self-describing package
    #[command(arg_required_else_help = true)]
    Encrypt {
        file: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Decrypts a package back to the original file
    #[command(arg_required_else_help = true)]
    Decrypt {
        package: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Shows the unencrypted metadata of a package
    #[command(arg_required_else_help = true)]
    Inspect { package: PathBuf },
}

#[derive(Debug, Subcommand)]
enum PasswordCommand {
    /// Scores a password; exits with 1 if it is too weak
    #[command(arg_required_else_help = true)]
    Check { password: String },

    /// Prints a random password
    Generate {
        #[arg(long, default_value_t = DEFAULT_GENERATED_LENGTH)]
        length: usize,
    },
}

#[derive(Debug, Subcommand)]
enum BtcCommand {
    /// Formats satoshis as BTC
    #[command(arg_required_else_help = true)]
    Format {
        #[arg(allow_hyphen_values = true)]
        sats: i64,
    },

    /// Converts a BTC amount to satoshis
    #[command(arg_required_else_help = true)]
    Sats {
        #[arg(allow_hyphen_values = true)]
        amount: String,
    },
}

/// How the store password, if any, is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreAccess {
    Existing,
    New,
    ClearOnly,
}

const DOCUMENT_EXTENSION: &str = "encrypted";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            match e.downcast_ref::<VaultError>() {
                Some(err) => eprintln!("error: {}", err.user_message()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Cli) -> Result<ExitCode> {
    let overrides = ConfigOverrides {
        data_dir: args.data_dir.clone(),
        network: args.network,
        ..ConfigOverrides::default()
    };
    let config = VaultConfig::load_or_default(args.config.as_deref())?.merge(&overrides)?;
    tracing::debug!(data_dir = %config.data_dir.display(), network = %config.network, "config resolved");

    match args.command {
        Commands::Mnemonic(cmd) => mnemonic_command(cmd),
        Commands::Wallet(cmd) => wallet_command(cmd, config).await,
        Commands::Backup(cmd) => backup_command(cmd, config).await,
        Commands::Qr(cmd) => qr_command(cmd, config).await,
        Commands::Document(cmd) => document_command(cmd, &config),
        Commands::Password(cmd) => password_command(cmd),
        Commands::Btc(cmd) => btc_command(cmd),
    }
}

fn mnemonic_command(cmd: MnemonicCommand) -> Result<ExitCode> {
    match cmd {
        MnemonicCommand::Generate {
            words,
            nonce,
            complexity,
            iterations,
        } => {
            let strength = MnemonicStrength::from_word_count(words)?;
            let mixing = nonce
                .map(|n| NonceMixing::new(n, complexity, iterations))
                .transpose()?;
            let mnemonic = SecureMnemonic::generate(strength, mixing.as_ref())?;
            println!("{}", mnemonic.phrase().as_str());
        }
        MnemonicCommand::Validate { phrase } => {
            if validate_mnemonic(&phrase.join(" ")) {
                println!("valid");
            } else {
                println!("invalid");
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn wallet_command(cmd: WalletCommand, config: VaultConfig) -> Result<ExitCode> {
    match cmd {
        WalletCommand::Create { words, accounts, yes } => {
            let config = with_account_count(config, accounts)?;
            let strength = MnemonicStrength::from_word_count(words)?;
            if !yes && !auth::is_interactive() {
                bail!("the backup challenge needs a terminal; pass --yes to answer it automatically");
            }

            let session = open_session(&config, StoreAccess::New)?;
            ensure_no_wallet(&session, &config).await?;

            let phrase = session.generate_seed(strength, None).await?;
            let words: Vec<&str> = phrase.split(' ').collect();
            eprintln!("Write these words down in order and keep them offline:");
            println!("{}", to_numbered_text(&words, None).as_str());

            let positions = session.verification_challenge().await?;
            let answers = if yes {
                positions
                    .iter()
                    .map(|p| words.get(p - 1).map(|w| w.to_string()).unwrap_or_default())
                    .collect::<Vec<_>>()
            } else {
                positions
                    .iter()
                    .map(|p| auth::read_line(&format!("Word #{p}: ")))
                    .collect::<Result<Vec<_>>>()?
            };
            let answers: Vec<&str> = answers.iter().map(String::as_str).collect();

            if !session.verify_backup(&answers).await? {
                bail!("backup check failed; the wallet was not saved");
            }
            let wallet = session.create_wallet().await?;
            println!("wallet created");
            print_wallet(&wallet)?;
        }
        WalletCommand::Import { source, accounts } => {
            let config = with_account_count(config, accounts)?;
            let text = read_source(&source)?;
            let phrase = backup::parse_plain_text(&text);

            let session = open_session(&config, StoreAccess::New)?;
            ensure_no_wallet(&session, &config).await?;
            let wallet = session.import_wallet(&phrase).await?;
            println!("wallet imported");
            print_wallet(&wallet)?;
        }
        WalletCommand::Show { json } => {
            let wallet = active_wallet(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(wallet.accounts())?);
            } else {
                print_wallet(&wallet)?;
            }
        }
        WalletCommand::AddAccount => {
            let session = open_session(&config, StoreAccess::Existing)?;
            require_wallet(&session, &config).await?;
            let account = session.add_account().await?;
            print_account(&account);
        }
        WalletCommand::Branch { branch } => {
            let session = open_session(&config, StoreAccess::Existing)?;
            require_wallet(&session, &config).await?;
            let wallet = session.switch_branch(branch).await?;
            print_wallet(&wallet)?;
        }
        WalletCommand::Reset { yes } => {
            if !yes {
                if !auth::is_interactive() {
                    bail!("refusing to delete the wallet without --yes");
                }
                let answer = auth::read_line("Type 'reset' to delete the stored wallet: ")?;
                if answer.trim() != "reset" {
                    println!("aborted");
                    return Ok(ExitCode::FAILURE);
                }
            }
            let session = open_session(&config, StoreAccess::ClearOnly)?;
            session.reset().await?;
            println!("wallet removed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn backup_command(cmd: BackupCommand, config: VaultConfig) -> Result<ExitCode> {
    let codec = BackupCodec::new(config.password_policy);
    match cmd {
        BackupCommand::ExportJson { out } => {
            let wallet = active_wallet(&config).await?;
            let password = auth::read_new_password("Backup password: ")?;
            let backup = codec.export_json(wallet.mnemonic(), &password)?;
            write_new_file(&out, backup.to_json()?.as_bytes())?;
            println!("backup written to {}", out.display());
        }
        BackupCommand::ExportText { out } => {
            let wallet = active_wallet(&config).await?;
            let words: Vec<&str> = wallet.mnemonic().split(' ').collect();
            let text = to_numbered_text(&words, Some(Utc::now()));
            write_new_file(&out, text.as_bytes())?;
            eprintln!("warning: {} holds your seed phrase in plain text", out.display());
            println!("backup written to {}", out.display());
        }
        BackupCommand::Import { file, accounts } => {
            let config = with_account_count(config, accounts)?;
            let text = fs::read_to_string(&file).with_context(|| format!("cannot read {}", file.display()))?;
            let password = if needs_password(&text) {
                Some(auth::read_password("Backup password: ")?)
            } else {
                None
            };
            let (phrase, format) = codec.import(&text, password.as_ref().map(|p| p.as_str()))?;
            tracing::debug!(?format, "backup decoded");

            let session = open_session(&config, StoreAccess::New)?;
            ensure_no_wallet(&session, &config).await?;
            let wallet = session.import_wallet(&phrase).await?;
            println!("wallet restored");
            print_wallet(&wallet)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn qr_command(cmd: QrCommand, config: VaultConfig) -> Result<ExitCode> {
    match cmd {
        QrCommand::Encode => {
            let wallet = active_wallet(&config).await?;
            let password = auth::read_new_password("QR password: ")?;
            config.password_policy.check_seed_export(&password)?;
            println!("{}", encode_qr_payload(wallet.mnemonic(), &password)?);
        }
        QrCommand::Decode { payload } => {
            let password = auth::read_password("QR password: ")?;
            let text = decode_qr_payload(&payload, &password)?;
            println!("{}", text.as_str());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn document_command(cmd: DocumentCommand, config: &VaultConfig) -> Result<ExitCode> {
    let cipher = DocumentCipher::new(config.password_policy);
    match cmd {
        DocumentCommand::Encrypt { file, out } => {
            let data = fs::read(&file).with_context(|| format!("cannot read {}", file.display()))?;
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .map(safe_file_name)
                .unwrap_or_else(|| "document".to_string());

            let password = auth::read_new_password("Document password: ")?;
            let (document, package) = cipher.encrypt(&name, &data, &password)?;

            let out = out.unwrap_or_else(|| file.with_file_name(format!("{name}.{DOCUMENT_EXTENSION}")));
            write_new_file(&out, &package)?;
            println!("id:        {}", document.id);
            println!("size:      {}", document.size_label);
            println!("integrity: {}", document.integrity_label());
            println!("package:   {}", out.display());
        }
        DocumentCommand::Decrypt { package, out } => {
            let bytes = fs::read(&package).with_context(|| format!("cannot read {}", package.display()))?;
            let password = auth::read_password("Document password: ")?;
            let document = cipher.decrypt_package(&bytes, &password)?;
            if document.hash_verified == Some(false) {
                bail!("decrypted content does not match the stored hash");
            }

            let out = out.unwrap_or_else(|| PathBuf::from(safe_file_name(&document.filename)));
            write_new_file(&out, &document.data)?;
            println!("{} ({}) written to {}", document.filename, document.mime_type, out.display());
        }
        DocumentCommand::Inspect { package } => {
            let bytes = fs::read(&package).with_context(|| format!("cannot read {}", package.display()))?;
            let pkg = EncryptedPackage::extract(&bytes)?;
            let created = DateTime::<Utc>::from_timestamp_millis(pkg.metadata.timestamp_millis)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());

            println!("filename:  {}", pkg.metadata.filename);
            println!("size:      {}", format_file_size(pkg.metadata.original_size));
            println!("integrity: {}", pkg.metadata.content_hash);
            println!("created:   {created}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn password_command(cmd: PasswordCommand) -> Result<ExitCode> {
    match cmd {
        PasswordCommand::Check { password } => {
            let strength = validate_password(&password);
            println!("score: {}/5", strength.score);
            for line in &strength.feedback {
                println!("- {line}");
            }
            if !strength.is_valid {
                return Ok(ExitCode::FAILURE);
            }
        }
        PasswordCommand::Generate { length } => {
            println!("{}", generate_secure_password(length)?.as_str());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn btc_command(cmd: BtcCommand) -> Result<ExitCode> {
    match cmd {
        BtcCommand::Format { sats } => println!("{}", format_btc(sats)),
        BtcCommand::Sats { amount } => println!("{}", to_satoshis(&amount)?),
    }
    Ok(ExitCode::SUCCESS)
}

fn with_account_count(config: VaultConfig, accounts: Option<u32>) -> Result<VaultConfig> {
    Ok(config.merge(&ConfigOverrides {
        account_count: accounts,
        ..ConfigOverrides::default()
    })?)
}

fn open_store(config: &VaultConfig, access: StoreAccess) -> Result<Box<dyn WalletStore>> {
    if !config.encrypt_at_rest {
        return Ok(Box::new(JsonFileStore::new(&config.data_dir)));
    }

    let password = match access {
        StoreAccess::Existing => auth::read_password("Store password: ")?,
        StoreAccess::New => auth::read_new_password("Store password: ")?,
        StoreAccess::ClearOnly => Default::default(),
    };
    Ok(Box::new(EncryptedFileStore::new(&config.data_dir, password.as_str())))
}

fn open_session(config: &VaultConfig, access: StoreAccess) -> Result<WalletSession<Box<dyn WalletStore>>> {
    let store = open_store(config, access)?;
    Ok(WalletSession::new(store, SessionConfig::from(config)))
}

async fn ensure_no_wallet(session: &WalletSession<Box<dyn WalletStore>>, config: &VaultConfig) -> Result<()> {
    if session.load().await? == SessionState::WalletActive {
        bail!(
            "a wallet already exists in {}; run `bitwill wallet reset` first",
            config.data_dir.display()
        );
    }
    Ok(())
}

async fn require_wallet(session: &WalletSession<Box<dyn WalletStore>>, config: &VaultConfig) -> Result<()> {
    if session.load().await? != SessionState::WalletActive {
        bail!("no wallet found in {}", config.data_dir.display());
    }
    Ok(())
}

async fn active_wallet(config: &VaultConfig) -> Result<Wallet> {
    let session = open_session(config, StoreAccess::Existing)?;
    require_wallet(&session, config).await?;
    session
        .wallet()
        .await
        .with_context(|| format!("no wallet found in {}", config.data_dir.display()))
}

fn print_wallet(wallet: &Wallet) -> Result<()> {
    println!("network:      {}", wallet.network());
    println!("address type: {}", wallet.address_type());
    println!("branch:       {}", wallet.branch());
    println!("xpub:         {}", wallet.account_xpub()?);
    for account in wallet.accounts() {
        print_account(account);
    }
    Ok(())
}

fn print_account(account: &Account) {
    println!(
        "#{:<3} {}  {}",
        account.index(),
        account.derivation_path(),
        account.address()
    );
}

fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    fs::read_to_string(source).with_context(|| format!("cannot read {source}"))
}

/// Last path component of a name that came from outside, never `.`/`..`.
fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        "document".to_string()
    } else {
        base.to_string()
    }
}

/// Refuses to overwrite; secrets land with owner-only permissions on unix.
fn write_new_file(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}
