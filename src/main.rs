use std::env;
use std::error::Error;
use std::fs::File;
use std::process;
use std::time::Instant;

use chrono::Local;
use log::{error, info, LevelFilter};
use ndarray::{arr0, Array2};
use ndarray_npy::{read_npy, NpzWriter};

use st_nmf::config::RunArgs;
use st_nmf::factor::{DataScaling, Factorization};
use st_nmf::{factorize, init_logger};

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn write_result(path: &std::path::Path, fit: &Factorization) -> Result<(), Box<dyn Error>> {
    let mut npz = NpzWriter::new(File::create(path)?);
    npz.add_array("S", &fit.s)?;
    npz.add_array("T", &fit.t)?;
    match &fit.scaling {
        DataScaling::Global { norm } => npz.add_array("norm", &arr0(*norm))?,
        DataScaling::PerRow { std, mean } => {
            npz.add_array("std", std)?;
            npz.add_array("mean", mean)?;
        }
    }
    npz.finish()?;
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = RunArgs::new(env::args())?;
    let config = args.to_config();

    info!("[{}] Loading {}", timestamp(), args.data_path.display());
    let y: Array2<f64> = read_npy(&args.data_path)?;

    let start = Instant::now();
    let fit = factorize(&y, config, None, None)?;
    info!(
        "[{}] Done in {:?}, relative error {:.4e}",
        timestamp(),
        start.elapsed(),
        fit.relative_error(&y)
    );

    write_result(&args.output_path, &fit)?;
    info!("[{}] Wrote {}", timestamp(), args.output_path.display());
    Ok(())
}

fn main() {
    init_logger(LevelFilter::Info);
    if let Err(e) = run() {
        error!("{}", e);
        process::exit(1);
    }
}
