//! Agent archive utilities: zip/unzip, checksums and the directory shape an
//! agent must have before it can be evaluated.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Names skipped when packing an agent or a log directory. A leading `*`
/// matches by suffix.
pub const ARCHIVE_EXCLUDES: &[&str] = &[
    "__pycache__",
    ".git",
    ".gitignore",
    "*.pyc",
    "*.pyo",
    "*.egg-info",
    "logs",
    "outputs",
    ".env",
    "venv",
    ".venv",
    "node_modules",
    ".pytest_cache",
    ".DS_Store",
];

/// Exclusions for engine log directories.
pub const LOG_EXCLUDES: &[&str] = &["__pycache__", "*.pyc", ".DS_Store"];

pub const POLICY_DIR: &str = "best_policy";
pub const POLICY_FILE: &str = "best_policy.pt";
pub const SOURCE_DIR: &str = "source";
pub const LIST_ENVS_SCRIPT: &str = "scripts/list_envs.py";

fn zip_err(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn is_excluded(name: &str, excludes: &[&str]) -> bool {
    excludes.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == *pattern,
    })
}

/// Pack `src` into a deflated zip at `dst`, skipping any path with a
/// component matching `excludes`. Entries are stored relative to `src`.
pub fn zip_directory(src: &Path, dst: &Path, excludes: &[&str]) -> io::Result<PathBuf> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(dst)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0usize;
    add_directory(&mut zip, src, src, excludes, options, &mut count)?;
    zip.finish().map_err(zip_err)?;

    debug!(src = %src.display(), dst = %dst.display(), files = count, "Created archive");
    Ok(dst.to_path_buf())
}

fn add_directory<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    base: &Path,
    current: &Path,
    excludes: &[&str],
    options: SimpleFileOptions,
    count: &mut usize,
) -> io::Result<()> {
    let mut entries = fs::read_dir(current)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name();
        if is_excluded(&name.to_string_lossy(), excludes) {
            continue;
        }
        if path.is_dir() {
            add_directory(zip, base, &path, excludes, options, count)?;
        } else if path.is_file() {
            let rel = path
                .strip_prefix(base)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let entry_name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            zip.start_file(entry_name, options).map_err(zip_err)?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
            *count += 1;
        }
    }
    Ok(())
}

/// Extract `archive` into `dest`, creating it if needed.
///
/// Entries whose names would land outside `dest` (absolute paths, `..`)
/// fail the whole extraction.
pub fn unzip_file(archive: &Path, dest: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest)?;
    let mut zip = ZipArchive::new(File::open(archive)?).map_err(zip_err)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("archive entry escapes target directory: {}", entry.name()),
            ));
        };
        let out = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        io::copy(&mut entry, &mut file)?;
    }

    debug!(archive = %archive.display(), dest = %dest.display(), "Extracted archive");
    Ok(dest.to_path_buf())
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Remove everything inside `dir`, keeping the directory itself.
/// A missing directory is created.
pub fn clean_directory(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Remove a file if it exists.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Problems that make an agent directory unusable. Empty when the shape is
/// valid. A missing `scripts/list_envs.py` only warns.
pub fn validate_agent_structure(dir: &Path) -> Vec<String> {
    let mut problems = Vec::new();

    if !dir.is_dir() {
        problems.push(format!("agent directory not found: {}", dir.display()));
        return problems;
    }

    let policy_dir = dir.join(POLICY_DIR);
    if !policy_dir.is_dir() {
        problems.push(format!("missing {POLICY_DIR}/ directory"));
    } else if !policy_dir.join(POLICY_FILE).is_file() {
        problems.push(format!("missing {POLICY_DIR}/{POLICY_FILE}"));
    }

    let source = dir.join(SOURCE_DIR);
    if !source.is_dir() {
        problems.push(format!("missing {SOURCE_DIR}/ directory"));
    } else {
        let modules = subdirectories(&source);
        if modules.is_empty() {
            problems.push(format!("{SOURCE_DIR}/ must contain at least one task module"));
        }
        for module in modules.iter().filter(|m| !m.join("__init__.py").is_file()) {
            let name = module.file_name().unwrap_or_default().to_string_lossy();
            problems.push(format!("task module missing __init__.py: {SOURCE_DIR}/{name}/"));
        }
    }

    if !dir.join(LIST_ENVS_SCRIPT).is_file() {
        warn!(dir = %dir.display(), "Recommended {LIST_ENVS_SCRIPT} is missing");
    }

    problems
}

/// Directories directly under `dir`, sorted by name.
fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// The module tree to install for `task_module`.
///
/// Prefers `source/<task_module>`; otherwise falls back to the first
/// directory under `source/` with a warning. `None` when `source/` has no
/// directories at all.
pub fn resolve_module_source(agent_dir: &Path, task_module: &str) -> Option<PathBuf> {
    let source = agent_dir.join(SOURCE_DIR);
    let preferred = source.join(task_module);
    if preferred.is_dir() {
        return Some(preferred);
    }

    let fallback = subdirectories(&source).into_iter().next()?;
    warn!(
        expected = %preferred.display(),
        using = %fallback.display(),
        "Task module not found under source/, using first directory"
    );
    Some(fallback)
}

/// Path of the policy checkpoint inside an extracted agent.
pub fn policy_path(agent_dir: &Path) -> PathBuf {
    agent_dir.join(POLICY_DIR).join(POLICY_FILE)
}

#[cfg(test)]
pub(crate) fn write_valid_agent(dir: &Path, module: &str) {
    fs::create_dir_all(dir.join(POLICY_DIR)).unwrap();
    fs::write(dir.join(POLICY_DIR).join(POLICY_FILE), b"weights").unwrap();
    fs::create_dir_all(dir.join(SOURCE_DIR).join(module)).unwrap();
    fs::write(dir.join(SOURCE_DIR).join(module).join("__init__.py"), b"").unwrap();
    fs::create_dir_all(dir.join("scripts")).unwrap();
    fs::write(dir.join(LIST_ENVS_SCRIPT), b"print('envs')").unwrap();
}
