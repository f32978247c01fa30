use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Makes `path` absolute against the working directory and folds `.`/`..` lexically.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    Ok(normalize(&joined))
}

pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path that leads from directory `from` to `to`; both must be absolute and normalized.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from_components = from.components().collect::<Vec<_>>();
    let to_components = to.components().collect::<Vec<_>>();
    let shared = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in shared..from_components.len() {
        out.push("..");
    }
    for component in &to_components[shared..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{normalize, relative_path};

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(
            normalize(Path::new("/data/./raw/../organized/sub-1")),
            PathBuf::from("/data/organized/sub-1")
        );
    }

    #[test]
    fn relative_path_walks_up_to_common_ancestor() {
        assert_eq!(
            relative_path(
                Path::new("/data/organized/sub-1"),
                Path::new("/data/raw/a.nwb")
            ),
            PathBuf::from("../../raw/a.nwb")
        );
        assert_eq!(
            relative_path(Path::new("/data"), Path::new("/data/raw/a.nwb")),
            PathBuf::from("raw/a.nwb")
        );
        assert_eq!(
            relative_path(Path::new("/data"), Path::new("/data")),
            PathBuf::from(".")
        );
    }
}
