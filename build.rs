// Links the system OpenBLAS that backs ndarray-linalg's LAPACK calls.
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=OPENBLAS_LIB");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    match locate_openblas(&target_os) {
        Some(dir) => {
            println!("cargo:rustc-link-search=native={}", dir.display());
            if !is_system_dir(&dir) && (target_os == "linux" || target_os == "macos") {
                println!("cargo:rustc-link-arg=-Wl,-rpath,{}", dir.display());
            }
        }
        None => {
            println!("cargo:warning=OpenBLAS not found; set OPENBLAS_LIB to its lib directory");
        }
    }
    println!("cargo:rustc-link-lib=openblas");
}

fn locate_openblas(target_os: &str) -> Option<PathBuf> {
    if let Ok(custom) = env::var("OPENBLAS_LIB") {
        return Some(PathBuf::from(custom));
    }

    let mut candidates = Vec::new();
    if let Ok(prefix) = env::var("CONDA_PREFIX") {
        candidates.push(PathBuf::from(prefix).join("lib"));
    }
    match target_os {
        "macos" => {
            candidates.push(PathBuf::from("/opt/homebrew/opt/openblas/lib"));
            candidates.push(PathBuf::from("/usr/local/opt/openblas/lib"));
            candidates.extend(command_dirs("brew", &["--prefix", "openblas"], |out| {
                vec![PathBuf::from(out.trim()).join("lib")]
            }));
        }
        "linux" => {
            candidates.extend(command_dirs("pkg-config", &["--libs-only-L", "openblas"], |out| {
                out.split_whitespace()
                    .filter_map(|flag| flag.strip_prefix("-L"))
                    .map(PathBuf::from)
                    .collect()
            }));
            for dir in ["/usr/lib/x86_64-linux-gnu", "/usr/lib64", "/usr/lib"] {
                candidates.push(PathBuf::from(dir));
            }
        }
        _ => {}
    }
    candidates.push(PathBuf::from("/usr/local/lib"));

    candidates.into_iter().find(|dir| has_openblas(dir))
}

fn command_dirs(program: &str, args: &[&str], parse: impl Fn(&str) -> Vec<PathBuf>) -> Vec<PathBuf> {
    match Command::new(program).args(args).output() {
        Ok(output) if output.status.success() => parse(&String::from_utf8_lossy(&output.stdout)),
        _ => Vec::new(),
    }
}

fn has_openblas(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(false, |name| name.starts_with("libopenblas") || name == "openblas.lib")
            })
        })
        .unwrap_or(false)
}

fn is_system_dir(dir: &Path) -> bool {
    ["/usr/lib", "/usr/lib64", "/usr/local/lib", "/lib", "/lib64"]
        .iter()
        .any(|sys| dir.starts_with(sys))
}
