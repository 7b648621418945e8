//! `woffle-compress in.ttf [out.woff2]`

use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (input, output) = match args.as_slice() {
        [input] => (PathBuf::from(input), default_output(Path::new(input))),
        [input, output] => (PathBuf::from(input), PathBuf::from(output)),
        _ => {
            eprintln!("usage: woffle-compress in.ttf [out.woff2]");
            return ExitCode::FAILURE;
        }
    };

    let sfnt = match std::fs::read(&input) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("failed to read {}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };

    let woff2 = match woffle::compress(&sfnt) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("compression failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = std::fs::write(&output, &woff2) {
        eprintln!("failed to write {}: {err}", output.display());
        return ExitCode::FAILURE;
    }
    println!(
        "compressed {} -> {} ({} -> {} bytes)",
        input.display(),
        output.display(),
        sfnt.len(),
        woff2.len()
    );
    ExitCode::SUCCESS
}

fn default_output(input: &Path) -> PathBuf {
    input.with_extension("woff2")
}
