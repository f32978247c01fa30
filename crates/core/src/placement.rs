use std::env;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::PlacementError;
use crate::model::PlacementMode;
use crate::paths::{absolutize, normalize, relative_path};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacementOptions {
    /// Replace a file already present at the destination.
    #[serde(default)]
    pub overwrite: bool,
    /// Compare content hashes of source and destination after copy/move.
    #[serde(default)]
    pub verify: bool,
    /// Report simulated destinations relative to the working directory.
    #[serde(default)]
    pub relative: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementOutcome {
    pub mode: PlacementMode,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub link_target: Option<PathBuf>,
}

/// Puts `source` at `destination` according to `mode`.
pub fn place(
    source: &Path,
    destination: &Path,
    mode: PlacementMode,
    options: &PlacementOptions,
) -> Result<PlacementOutcome, PlacementError> {
    let mut outcome = PlacementOutcome {
        mode,
        source: source.to_path_buf(),
        destination: destination.to_path_buf(),
        link_target: None,
    };

    match mode {
        PlacementMode::Dry => {}
        PlacementMode::Simulate => {
            outcome.destination = simulated_destination(destination, options.relative)?;
        }
        PlacementMode::Copy => {
            require_file(source)?;
            prepare_destination(destination, options.overwrite)?;
            fs::copy(source, destination)
                .map_err(|err| PlacementError::io("copy to", destination, err))?;
            if options.verify {
                verify_same_content(&hash_file(source)?, source, destination)?;
            }
        }
        PlacementMode::Move => {
            require_file(source)?;
            prepare_destination(destination, options.overwrite)?;
            let source_hash = if options.verify {
                Some(hash_file(source)?)
            } else {
                None
            };
            move_file(source, destination)?;
            if let Some(source_hash) = source_hash {
                verify_same_content(&source_hash, source, destination)?;
            }
        }
        PlacementMode::Symlink | PlacementMode::SymlinkRelative => {
            let resolved = fs::canonicalize(source).map_err(|err| {
                PlacementError::SourceUnresolvable {
                    path: source.to_path_buf(),
                    source: err,
                }
            })?;
            prepare_destination(destination, options.overwrite)?;
            let target = if mode == PlacementMode::SymlinkRelative {
                let link_dir = destination
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let link_dir = fs::canonicalize(link_dir)
                    .map_err(|err| PlacementError::io("resolve", link_dir, err))?;
                relative_path(&link_dir, &resolved)
            } else {
                resolved
            };
            create_symlink(&target, destination)
                .map_err(|err| PlacementError::io("create symlink", destination, err))?;
            if !destination.exists() {
                discard_broken_link(destination);
                return Err(PlacementError::BrokenLink {
                    link: destination.to_path_buf(),
                    target,
                });
            }
            outcome.link_target = Some(target);
        }
    }

    debug!(
        "{} {} -> {}",
        mode,
        source.display(),
        outcome.destination.display()
    );
    Ok(outcome)
}

fn discard_broken_link(link: &Path) -> bool {
    match fs::remove_file(link) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to remove broken symlink {}: {err}", link.display());
            false
        }
    }
}

fn simulated_destination(destination: &Path, relative: bool) -> Result<PathBuf, PlacementError> {
    let absolute =
        absolutize(destination).map_err(|err| PlacementError::io("resolve", destination, err))?;
    if !relative {
        return Ok(absolute);
    }
    let cwd = env::current_dir()
        .map_err(|err| PlacementError::io("resolve", PathBuf::from("."), err))?;
    Ok(relative_path(&normalize(&cwd), &absolute))
}

fn require_file(source: &Path) -> Result<(), PlacementError> {
    let metadata = fs::metadata(source).map_err(|err| PlacementError::SourceUnresolvable {
        path: source.to_path_buf(),
        source: err,
    })?;
    if metadata.is_file() {
        Ok(())
    } else {
        Err(PlacementError::SourceUnresolvable {
            path: source.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        })
    }
}

fn prepare_destination(destination: &Path, overwrite: bool) -> Result<(), PlacementError> {
    if let Ok(existing) = fs::symlink_metadata(destination) {
        if !overwrite || existing.is_dir() {
            return Err(PlacementError::DestinationExists(destination.to_path_buf()));
        }
        fs::remove_file(destination)
            .map_err(|err| PlacementError::io("remove", destination, err))?;
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| PlacementError::io("create directory", parent, err))?;
        }
    }
    Ok(())
}

// Renames fail across filesystems; fall back to copy and delete.
fn move_file(source: &Path, destination: &Path) -> Result<(), PlacementError> {
    if let Err(err) = fs::rename(source, destination) {
        debug!(
            "rename of {} failed ({err}); copying instead",
            source.display()
        );
        fs::copy(source, destination)
            .map_err(|err| PlacementError::io("copy to", destination, err))?;
        fs::remove_file(source).map_err(|err| PlacementError::io("remove", source, err))?;
    }
    Ok(())
}

fn verify_same_content(
    source_hash: &str,
    source: &Path,
    destination: &Path,
) -> Result<(), PlacementError> {
    if hash_file(destination)? == source_hash {
        Ok(())
    } else {
        Err(PlacementError::VerificationFailed {
            source_path: source.to_path_buf(),
            destination: destination.to_path_buf(),
        })
    }
}

fn hash_file(path: &Path) -> Result<String, PlacementError> {
    let file = File::open(path).map_err(|err| PlacementError::io("open", path, err))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0_u8; 64 * 1024];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|err| PlacementError::io("read", path, err))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn create_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}
