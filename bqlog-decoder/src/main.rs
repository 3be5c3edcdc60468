use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use bqlog::{crypto, decoder};
use clap::Parser;

const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
const SUPPORTED_FORMAT_VERSIONS: &str = "1";

/// Decodes a bqlog binary log file (`.lograw`/`.logcompr`) into readable text.
#[derive(Parser)]
#[command(name = "log_decoder")]
struct Cli {
    /// Path to the binary log file to decode.
    input: PathBuf,
    /// Path to write the decoded text to. Defaults to stdout.
    output: Option<PathBuf>,
    /// PEM-encoded RSA private key, required to decode an encrypted file.
    #[arg(short, long)]
    secret_key: Option<String>,
}

/// The negated value doubles as the process exit code on failure, per
/// variant, since exit statuses are unsigned on every supported platform.
fn decode_error_code(err: &decoder::Error) -> u8 {
    match err {
        decoder::Error::Io(_) => 1,
        decoder::Error::Truncated => 2,
        decoder::Error::UnsupportedVersion(_) => 3,
        decoder::Error::UnknownFormat(_) => 4,
        decoder::Error::BadMagic => 5,
        decoder::Error::Crypto(_) => 6,
        decoder::Error::MissingPrivateKey => 7,
        decoder::Error::MalformedRecord(_) => 8,
    }
}

fn run(cli: Cli) -> Result<(), decoder::Error> {
    let private_key = cli
        .secret_key
        .as_deref()
        .map(crypto::parse_private_key_pem)
        .transpose()
        .map_err(decoder::Error::Crypto)?;

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };

    decoder::decode_file_with(&cli.input, private_key.as_ref(), |line| writeln!(out, "{line}"))
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!(
                "log_decoder {TOOL_VERSION} (supports binary format versions: {SUPPORTED_FORMAT_VERSIONS})"
            );
            err.print().ok();
            return ExitCode::from(2);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!(
                "log_decoder {TOOL_VERSION} (supports binary format versions: {SUPPORTED_FORMAT_VERSIONS})"
            );
            eprintln!("error: {err}");
            ExitCode::from(decode_error_code(&err))
        }
    }
}
