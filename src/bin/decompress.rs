//! `woffle-decompress in.woff2`

use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let input = match args.as_slice() {
        [input] => PathBuf::from(input),
        _ => {
            eprintln!("usage: woffle-decompress in.woff2");
            return ExitCode::FAILURE;
        }
    };
    let output = default_output(&input);

    let woff2 = match std::fs::read(&input) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("failed to read {}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };

    let sfnt = match woffle::decompress(&woff2) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("decompression failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = std::fs::write(&output, &sfnt) {
        eprintln!("failed to write {}: {err}", output.display());
        return ExitCode::FAILURE;
    }
    println!(
        "decompressed {} -> {} ({} -> {} bytes)",
        input.display(),
        output.display(),
        woff2.len(),
        sfnt.len()
    );
    ExitCode::SUCCESS
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("ttf")
}
