use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use bikelink_core::cipher::{self, EncryptionKey};
use bikelink_core::payload::{
    BootloaderTrailer, FirmwareImage, Pack, PackBuilder, WareImage, WareVerification,
};
use bikelink_core::protocol::constants::MAX_CHUNK_SIZE;
use bikelink_core::session::SessionConfig;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Firmware and log tooling for the vehicle maintenance protocol", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the metadata header and chunking of a firmware image
    Inspect {
        image: PathBuf,
    },
    /// Pad and encrypt a firmware image as it would be sent
    Encrypt {
        image: PathBuf,
        /// Encryption key as 32 hex digits (overrides the config file)
        #[arg(long)]
        key: Option<String>,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Decrypt an encrypted image (padding is kept)
    Decrypt {
        image: PathBuf,
        #[arg(long)]
        key: Option<String>,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Extract every file from a PACK bundle
    Unpack {
        pack: PathBuf,
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Build a PACK bundle from files
    Pack {
        pack: PathBuf,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    match args.command {
        Command::Inspect { image } => inspect(&image),
        Command::Encrypt { image, key, out } => {
            let key = resolve_key(key.as_deref(), &config)?;
            encrypt(&image, &key, &out)
        }
        Command::Decrypt { image, key, out } => {
            let key = resolve_key(key.as_deref(), &config)?;
            let data = std::fs::read(&image)?;
            std::fs::write(&out, cipher::decrypt(&data, &key)?)?;
            info!(out = %out.display(), "Wrote decrypted image");
            Ok(())
        }
        Command::Unpack { pack, out_dir } => unpack(&pack, &out_dir),
        Command::Pack { pack, files } => build_pack(&pack, &files),
    }
}

fn resolve_key(flag: Option<&str>, config: &SessionConfig) -> Result<EncryptionKey> {
    if let Some(hex) = flag {
        return Ok(EncryptionKey::from_hex(hex)?);
    }
    config
        .encryption_key()?
        .ok_or_else(|| anyhow!("no key given: pass --key or set `key` in the config file"))
}

fn describe(image: &FirmwareImage) -> Vec<String> {
    let header = cipher::compute_header(image);
    let padded_len = cipher::pad(image.raw_data()).len();
    let chunks = padded_len.div_ceil(MAX_CHUNK_SIZE);

    vec![
        format!("length:      {} (0x{:08x})", image.length(), image.length()),
        format!("crc32:       0x{:08x}", image.crc32()),
        format!("metadata:    {}", hex::encode(header.to_bytes())),
        format!("padded:      {}", padded_len),
        format!("chunks:      {} x <= {} bytes", chunks, MAX_CHUNK_SIZE),
    ]
}

fn inspect(path: &Path) -> Result<()> {
    let image = FirmwareImage::from_file(path)?;
    for line in describe(&image) {
        println!("{line}");
    }

    let (lines, check) = describe_ware(image.raw_data())?;
    for line in lines {
        println!("{line}");
    }
    if !check.is_ok() {
        warn!(computed = %format!("0x{:08x}", check.computed), "Ware CRC mismatch");
    }
    Ok(())
}

fn status(check: &WareVerification) -> &'static str {
    if check.is_ok() { "OK" } else { "FAIL" }
}

fn describe_ware(data: &[u8]) -> Result<(Vec<String>, WareVerification)> {
    let mut lines = Vec::new();
    let check = match WareImage::detect(data) {
        WareImage::Main(ware) => {
            let check = ware.verify(data)?;
            lines.push(format!("ware:        version 0x{:08x}", ware.version));
            lines.push(format!("ware build:  {} {}", ware.date_str(), ware.time_str()));
            lines.push(format!("ware length: 0x{:08x}", ware.length));
            lines.push(format!("ware crc:    0x{:08x} {}", check.stored, status(&check)));
            check
        }
        WareImage::Ble(ble) => {
            let check = ble.verify(data)?;
            lines.push(format!("ble ware:    version 0x{:08x}", ble.soft_ver));
            lines.push(format!("ble length:  0x{:08x}", ble.len));
            lines.push(format!("ble entry:   0x{:08x}", ble.prg_entry));
            lines.push(format!("ble hdr len: 0x{:08x}", ble.hdr_len));
            lines.push(format!("ble crc:     0x{:08x} {}", check.stored, status(&check)));
            check
        }
        WareImage::Bootloader => {
            info!("No ware header, assuming boot-loader binary");
            let trailer = BootloaderTrailer::verify(data)?;
            let check = trailer.verification;
            lines.push(format!("boot-loader: version {}", trailer.version));
            lines.push(format!("boot crc:    0x{:08x} {}", check.stored, status(&check)));
            check
        }
    };
    Ok((lines, check))
}

fn encrypt(image: &Path, key: &EncryptionKey, out: &Path) -> Result<()> {
    let image = FirmwareImage::from_file(image)?;
    let encrypted = cipher::encrypt_image(&image, key);
    std::fs::write(out, &encrypted)?;
    info!(out = %out.display(), len = encrypted.len(), "Wrote encrypted image");
    Ok(())
}

fn unpack(pack: &Path, out_dir: &Path) -> Result<()> {
    let pack = Pack::from_file(pack)?;
    std::fs::create_dir_all(out_dir)?;
    for entry in pack.entries() {
        // Entry names come from the file; keep only the final component.
        let name = Path::new(&entry.name)
            .file_name()
            .ok_or_else(|| anyhow!("bad entry name {:?}", entry.name))?;
        let target = out_dir.join(name);
        println!(
            "entry: {} offset {}, length {}",
            entry.name, entry.offset, entry.length
        );
        let data = pack
            .data(entry)
            .ok_or_else(|| anyhow!("entry {} lies outside the bundle", entry.name))?;
        std::fs::write(&target, data)?;
    }
    Ok(())
}

fn build_pack(pack: &Path, files: &[PathBuf]) -> Result<()> {
    let mut builder = PackBuilder::new();
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("bad file name {}", file.display()))?;
        let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        println!("file: {}, length 0x{:08x}", name, data.len());
        builder.add(name, data)?;
    }
    std::fs::write(pack, builder.build()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let image = FirmwareImage::from_bytes(b"123456789".to_vec()).unwrap();
        let lines = describe(&image);
        assert!(lines[1].ends_with("0xcbf43926"));
        assert!(lines[2].ends_with("0000000009cbf43926"));
        assert!(lines[3].ends_with("16"));
        assert!(lines[4].contains("1 x"));
    }

    #[test]
    fn test_describe_ware_falls_back_to_bootloader() {
        let mut data = vec![0u8; 32];
        data[24..28].copy_from_slice(&[0, b'3', b'2', b'B']);
        let (lines, check) = describe_ware(&data).unwrap();
        assert_eq!(lines[0], "boot-loader: version B23");
        assert!(lines[1].ends_with("FAIL"));
        assert_eq!(check.stored, 0);
        assert!(describe_ware(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_resolve_key_precedence() {
        let config = SessionConfig {
            key: Some("0f0e0d0c0b0a09080706050403020100".into()),
            ..SessionConfig::default()
        };
        let from_flag = resolve_key(Some("000102030405060708090a0b0c0d0e0f"), &config).unwrap();
        assert_eq!(from_flag.as_bytes()[1], 0x01);
        let from_config = resolve_key(None, &config).unwrap();
        assert_eq!(from_config.as_bytes()[0], 0x0f);
        assert!(resolve_key(None, &SessionConfig::default()).is_err());
    }

    #[test]
    fn test_pack_unpack_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("main.bin");
        let b = dir.path().join("ble.bin");
        std::fs::write(&a, b"main").unwrap();
        std::fs::write(&b, b"ble!!").unwrap();

        let pack = dir.path().join("bundle.pack");
        build_pack(&pack, &[a, b]).unwrap();

        let out = dir.path().join("out");
        unpack(&pack, &out).unwrap();
        assert_eq!(std::fs::read(out.join("main.bin")).unwrap(), b"main");
        assert_eq!(std::fs::read(out.join("ble.bin")).unwrap(), b"ble!!");
    }

    #[test]
    fn test_encrypt_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("fw.bin");
        let dst = dir.path().join("fw.enc");
        std::fs::write(&src, vec![0u8; 20]).unwrap();

        let key = EncryptionKey::new([1; 16]);
        encrypt(&src, &key, &dst).unwrap();
        let enc = std::fs::read(&dst).unwrap();
        assert_eq!(enc.len(), 32);
        assert_eq!(&cipher::decrypt(&enc, &key).unwrap()[..20], &[0u8; 20]);
    }
}
