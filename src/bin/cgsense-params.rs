use cgsense_reco::ReconParams;
use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// path to recon parameters file to write
    parameter_file: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let params = ReconParams::default();
    let mut toml_string = toml::to_string(&params)?;
    toml_string.push('\n');
    let filename = args.parameter_file.with_extension("toml");
    let mut f = File::create(&filename)?;
    f.write_all(toml_string.as_bytes())?;
    println!("wrote default parameter file to {}", filename.display());
    Ok(())
}
