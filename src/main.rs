use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
mod auth;
use pwcrypt::{
    CipherMode, FileDecryptor, FileEncryptor, KdfDigest, SecurityConfig, SecurityTier, Storage,
    StreamOptions, format,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, clap::Args)]
struct KdfArgs {
    /// Security tier: minimum, medium or high (default: medium)
    #[arg(long, env = "PWCRYPT_TIER")]
    tier: Option<SecurityTier>,

    /// Key length in bits: 128, 192 or 256 (requires --iterations and --salt-size)
    #[arg(long)]
    key_bits: Option<u32>,

    /// PBKDF2 iteration count
    #[arg(long)]
    iterations: Option<u32>,

    /// Salt size in bytes
    #[arg(long)]
    salt_size: Option<u32>,

    /// PBKDF2 HMAC digest
    #[arg(long, value_enum, default_value_t = DigestArg::Sha256)]
    digest: DigestArg,
}

impl KdfArgs {
    /// Explicit parameters win over the tier.
    fn to_config(&self) -> Result<SecurityConfig> {
        let config =
            if self.key_bits.is_none() && self.iterations.is_none() && self.salt_size.is_none() {
                SecurityConfig::tier(self.tier.unwrap_or_default())
            } else {
                SecurityConfig::custom(self.key_bits, self.iterations, self.salt_size)?
            };
        Ok(config.with_digest(self.digest.into()))
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DigestArg {
    Sha1,
    Sha256,
    Sha512,
}

impl From<DigestArg> for KdfDigest {
    fn from(digest: DigestArg) -> Self {
        match digest {
            DigestArg::Sha1 => KdfDigest::Sha1,
            DigestArg::Sha256 => KdfDigest::Sha256,
            DigestArg::Sha512 => KdfDigest::Sha512,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// AES-GCM, authenticated
    Gcm,
    /// AES-CBC with PKCS#7 padding
    Cbc,
}

impl From<ModeArg> for CipherMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Gcm => CipherMode::Gcm,
            ModeArg::Cbc => CipherMode::Cbc,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pwcrypt")]
#[command(version, about = "Password-based file encryption with PBKDF2 and AES.")]
struct Cli {
    /// Log key derivation and cipher setup
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts a file into a pwcrypt container
    #[command(arg_required_else_help = true)]
    Encrypt {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        kdf: KdfArgs,

        #[arg(long, value_enum, default_value_t = ModeArg::Gcm)]
        mode: ModeArg,

        /// Store the payload without deflate compression
        #[arg(long)]
        no_compress: bool,

        /// Print progress to stderr
        #[arg(long)]
        progress: bool,

        /// Overwrite OUTPUT if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Decrypts a pwcrypt container
    #[command(arg_required_else_help = true)]
    Decrypt {
        input: PathBuf,
        output: PathBuf,

        /// Print progress to stderr
        #[arg(long)]
        progress: bool,

        /// Overwrite OUTPUT if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Shows container parameters without decrypting
    #[command(arg_required_else_help = true)]
    Inspect { input: PathBuf },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn check_paths(input: &Path, output: &Path, force: bool) -> Result<()> {
    if input == output {
        bail!("input and output must be different files");
    }
    if Storage::new(output).exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    Ok(())
}

fn print_progress(percent: u8) {
    eprint!("\r{percent:>3}%");
    if percent == 100 {
        eprintln!();
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_logging(args.verbose);

    match args.command {
        Commands::Encrypt {
            input,
            output,
            kdf,
            mode,
            no_compress,
            progress,
            force,
        } => {
            check_paths(&input, &output, force)?;
            let config = kdf
                .to_config()?
                .with_mode(mode.into())
                .with_compression(!no_compress);

            let password = auth::read_new_password()?;
            let encryptor = FileEncryptor::new(&password, config)?;
            drop(password);

            let mut report = print_progress;
            let options = if progress {
                StreamOptions::new().with_progress(&mut report)
            } else {
                StreamOptions::new()
            };
            let n = encryptor
                .encrypt_file(&input, &output, options)
                .with_context(|| format!("failed to encrypt {}", input.display()))?;
            println!("encrypted {n} bytes to {}", output.display());
        }
        Commands::Decrypt {
            input,
            output,
            progress,
            force,
        } => {
            check_paths(&input, &output, force)?;

            let password = auth::read_password()?;
            let decryptor = FileDecryptor::new(&password)?;
            drop(password);

            let mut report = print_progress;
            let options = if progress {
                StreamOptions::new().with_progress(&mut report)
            } else {
                StreamOptions::new()
            };
            let n = decryptor
                .decrypt_file(&input, &output, options)
                .with_context(|| format!("failed to decrypt {}", input.display()))?;
            println!("decrypted {n} bytes to {}", output.display());
        }
        Commands::Inspect { input } => {
            let file = File::open(&input)
                .with_context(|| format!("failed to open {}", input.display()))?;
            let header = format::read_header(&mut BufReader::new(file))
                .with_context(|| format!("{} is not a pwcrypt container", input.display()))?;
            let kdf = header.kdf()?;

            println!("version:     {}", header.version());
            println!("mode:        {}", header.mode());
            println!(
                "compressed:  {}",
                if header.compressed() { "yes" } else { "no" }
            );
            println!("kdf:         PBKDF2-HMAC-{}", kdf.digest());
            println!("key length:  {} bits", kdf.key_len_bits());
            println!("salt size:   {} bytes", kdf.salt_size());
            println!("iterations:  {}", kdf.iterations());
        }
    }

    Ok(())
}
