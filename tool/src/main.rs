// Licensed under the Apache-2.0 license

//! DFU image tool
//!
//! Builds the images consumed by the serial bootloader, checks existing ones
//! and sends them to the device.
//!
//! ```bash
//! dfu-tool create --binary app.bin --linker-script app.ld --version 1.2.0 --key signing.pem
//! dfu-tool verify --image update_firmware/app.bin --public-key signing.pub.pem
//! dfu-tool info --image update_firmware/app.bin --signed
//! dfu-tool update --image update_firmware/app.bin --port /dev/ttyUSB0
//! ```

mod keys;
mod layout;
mod update;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use dfu_builder::{
    build_image, inspect_image, verify_image, EcdsaP256Signer, ImageConfig, ImageSummary,
    ImageVersion, LayoutBounds, ProofMode, ProofSource,
};
use dfu_transport::SessionOptions;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, env = "DFU_LOG", value_parser = parse_level, default_value = "info", global = true)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pad a firmware binary to its flash region and append the DFU footer
    Create {
        /// Raw firmware binary
        #[arg(long)]
        binary: PathBuf,

        /// Linker script defining __flash_app_start__ and __flash_app_end__
        #[arg(long, conflicts_with_all = ["app_start", "app_end"])]
        linker_script: Option<PathBuf>,

        /// First byte of the application region
        #[arg(long, value_parser = maybe_hex::<u64>, requires = "app_end")]
        app_start: Option<u64>,

        /// Last byte (inclusive) of the application region
        #[arg(long, value_parser = maybe_hex::<u64>, requires = "app_start")]
        app_end: Option<u64>,

        /// Image version, MAJOR.MINOR.PATCH
        #[arg(long, value_parser = parse_version)]
        version: ImageVersion,

        /// P-256 private key (PKCS#8 or SEC1 PEM). Without it the footer
        /// carries a SHA-256 digest instead of a signature.
        #[arg(long)]
        key: Option<PathBuf>,

        /// Directory receiving update_firmware/ [default: next to the binary]
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Check the CRC and integrity proof of an image
    Verify {
        #[arg(long)]
        image: PathBuf,

        /// P-256 public key (SPKI PEM), for signed images
        #[arg(long)]
        public_key: Option<PathBuf>,
    },
    /// Print the footer of an image
    Info {
        #[arg(long)]
        image: PathBuf,

        /// The image carries a signature footer
        #[arg(long, default_value_t = false)]
        signed: bool,
    },
    /// Send an image to the bootloader over a serial port
    Update {
        #[arg(long)]
        image: PathBuf,

        /// Serial device, e.g. /dev/ttyUSB0 or COM3
        #[arg(long, env = "DFU_PORT")]
        port: String,

        #[arg(long, default_value_t = update::DEFAULT_BAUD_RATE)]
        baud: u32,

        /// Send attempts per message, the first one included
        #[arg(long, default_value_t = dfu_transport::config::DEFAULT_MAX_ATTEMPTS)]
        max_attempts: usize,
    },
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse()
        .map_err(|_| format!("invalid log level {s:?}"))
}

fn parse_version(s: &str) -> Result<ImageVersion, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    SimpleLogger::new().with_level(cli.log_level).init()?;

    match cli.command {
        Commands::Create {
            binary,
            linker_script,
            app_start,
            app_end,
            version,
            key,
            out_dir,
        } => {
            let bounds = match (linker_script, app_start, app_end) {
                (Some(script), _, _) => layout::read_layout_bounds(&script)?,
                (None, Some(start), Some(end)) => LayoutBounds::from_addresses(start, end),
                _ => bail!("either --linker-script or --app-start and --app-end is required"),
            };
            create(&binary, &bounds, version, key.as_deref(), out_dir)
        }
        Commands::Verify { image, public_key } => {
            let bytes = read_image(&image)?;
            let summary = match public_key {
                Some(path) => {
                    let key = keys::load_verifying_key(&path)?;
                    verify_image(&bytes, ProofMode::Signature, Some(&key))
                }
                None => verify_image(&bytes, ProofMode::Digest, None),
            }
            .with_context(|| format!("{} failed verification", image.display()))?;
            print_summary(&image, &summary);
            println!("OK");
            Ok(())
        }
        Commands::Info { image, signed } => {
            let mode = if signed {
                ProofMode::Signature
            } else {
                ProofMode::Digest
            };
            let summary = inspect_image(&read_image(&image)?, mode)?;
            print_summary(&image, &summary);
            Ok(())
        }
        Commands::Update {
            image,
            port,
            baud,
            max_attempts,
        } => {
            let bytes = read_image(&image)?;
            let options = SessionOptions {
                max_attempts,
                ..Default::default()
            };
            let summary = update::update_over_serial(&port, baud, &bytes, options)?;
            println!(
                "Sent {} bytes in {} chunks ({} retries)",
                summary.bytes, summary.chunks, summary.retries
            );
            Ok(())
        }
    }
}

fn create(
    binary: &Path,
    bounds: &LayoutBounds,
    version: ImageVersion,
    key: Option<&Path>,
    out_dir: Option<PathBuf>,
) -> Result<()> {
    let capacity = bounds.resolve()?;
    let firmware =
        fs::read(binary).with_context(|| format!("Failed to read {}", binary.display()))?;
    info!(
        "{}: {} bytes, region capacity {capacity} bytes",
        binary.display(),
        firmware.len()
    );

    let image = match key {
        Some(path) => {
            let mut signer = EcdsaP256Signer::new(keys::load_signing_key(path)?);
            let config = ImageConfig {
                capacity,
                version,
                mode: ProofMode::Signature,
            };
            build_image(firmware, &config, ProofSource::Signer(&mut signer))?
        }
        None => {
            let config = ImageConfig {
                capacity,
                version,
                mode: ProofMode::Digest,
            };
            build_image(firmware, &config, ProofSource::Digest)?
        }
    };

    let out_dir = match out_dir {
        Some(dir) => dir,
        None => binary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let file_name = binary
        .file_name()
        .and_then(|name| name.to_str())
        .context("binary path has no file name")?;
    let committed = image.commit(&out_dir, file_name)?;
    println!("Image:    {}", committed.image_path.display());
    println!("Manifest: {}", committed.manifest_path.display());
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_summary(path: &Path, summary: &ImageSummary) {
    println!("{}", path.display());
    println!("  length:   {} bytes", summary.len);
    println!("  payload:  {} bytes", summary.payload_len);
    println!("  crc32:    {:08X}", summary.crc32);
    println!("  version:  {}", summary.version);
    println!("  proof:    {} {}", summary.mode, hex::encode(&summary.proof));
}
