//! Plugin packages and discovery
//!
//! A package is either a directory or a `.zip` archive carrying one of the
//! [`DESCRIPTOR_FILES`] at its root and, optionally, bundled files below
//! [`RESOURCES_DIR`]. Packages compiled into the host are [`PluginPackage::builtin`].

use config::{Config as Cfg, File, FileFormat};
use hoyo_kernel::plugin::{DESCRIPTOR_FILES, LoadError, PluginDescriptor, RESOURCES_DIR};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

/// Where a package's files come from.
#[derive(Debug, Clone)]
pub enum PackageSource {
    Directory(PathBuf),
    Archive(PathBuf),
    /// Compiled into the host; resources are held in memory.
    Builtin(BTreeMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
pub struct PluginPackage {
    descriptor: PluginDescriptor,
    source: PackageSource,
}

impl PluginPackage {
    pub fn builtin(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor,
            source: PackageSource::Builtin(BTreeMap::new()),
        }
    }

    /// Bundle a resource with a builtin package. Ignored for other sources.
    pub fn with_resource(mut self, name: &str, contents: impl Into<Vec<u8>>) -> Self {
        if let PackageSource::Builtin(resources) = &mut self.source {
            resources.insert(name.to_string(), contents.into());
        }
        self
    }

    /// Open a package directory or `.zip` archive and validate its descriptor.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let package = if path.is_dir() {
            Self::open_directory(path)?
        } else if is_archive(path) {
            Self::open_archive(path)?
        } else {
            return Err(malformed(path, "not a directory or .zip archive"));
        };
        package.descriptor.validate()?;
        Ok(package)
    }

    fn open_directory(dir: &Path) -> Result<Self, LoadError> {
        let descriptor_path = DESCRIPTOR_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| malformed(dir, "no plugin descriptor found"))?;

        let content = fs::read_to_string(&descriptor_path)
            .map_err(|e| malformed(&descriptor_path, e.to_string()))?;
        let descriptor = parse_descriptor(&descriptor_path, &content)?;

        Ok(Self {
            descriptor,
            source: PackageSource::Directory(dir.to_path_buf()),
        })
    }

    fn open_archive(path: &Path) -> Result<Self, LoadError> {
        let mut archive = open_zip(path)?;

        let mut found = None;
        for name in DESCRIPTOR_FILES {
            if let Ok(mut entry) = archive.by_name(name) {
                let mut content = String::new();
                entry
                    .read_to_string(&mut content)
                    .map_err(|e| malformed(path, format!("cannot read {}: {}", name, e)))?;
                found = Some((name, content));
                break;
            }
        }
        let (name, content) = found.ok_or_else(|| malformed(path, "no plugin descriptor found"))?;
        let descriptor = parse_descriptor(&path.join(name), &content)?;

        Ok(Self {
            descriptor,
            source: PackageSource::Archive(path.to_path_buf()),
        })
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> &PackageSource {
        &self.source
    }

    /// Names (relative to the resources directory, `/`-separated) of every
    /// bundled resource file.
    pub fn resource_names(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = match &self.source {
            PackageSource::Builtin(resources) => resources.keys().cloned().collect(),
            PackageSource::Directory(dir) => {
                let root = dir.join(RESOURCES_DIR);
                if !root.is_dir() {
                    return Ok(Vec::new());
                }
                let mut names = Vec::new();
                for entry in WalkDir::new(&root).follow_links(false) {
                    let entry = entry.map_err(io::Error::other)?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    if let Ok(relative) = entry.path().strip_prefix(&root) {
                        let parts: Vec<String> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        names.push(parts.join("/"));
                    }
                }
                names
            }
            PackageSource::Archive(path) => {
                let archive = open_zip(path).map_err(io::Error::other)?;
                let prefix = format!("{}/", RESOURCES_DIR);
                let names: Vec<String> = archive
                    .file_names()
                    .filter(|name| !name.ends_with('/'))
                    .filter_map(|name| name.strip_prefix(&prefix))
                    .filter(|name| is_safe_resource_name(name))
                    .map(str::to_string)
                    .collect();
                names
            }
        };
        names.sort();
        Ok(names)
    }

    /// Read one bundled resource. `Ok(None)` when the package has no such file.
    pub fn read_resource(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        if !is_safe_resource_name(name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid resource name '{}'", name),
            ));
        }

        match &self.source {
            PackageSource::Builtin(resources) => Ok(resources.get(name).cloned()),
            PackageSource::Directory(dir) => {
                let path = dir.join(RESOURCES_DIR).join(name);
                match fs::read(&path) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            }
            PackageSource::Archive(path) => {
                let mut archive = open_zip(path).map_err(io::Error::other)?;
                let mut entry = match archive.by_name(&format!("{}/{}", RESOURCES_DIR, name)) {
                    Ok(entry) => entry,
                    Err(zip::result::ZipError::FileNotFound) => return Ok(None),
                    Err(e) => return Err(io::Error::other(e)),
                };
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes)?;
                Ok(Some(bytes))
            }
        }
    }
}

/// Result of scanning a plugin directory.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Valid packages, in file-name order.
    pub packages: Vec<PluginPackage>,
    /// One entry per package that could not be opened.
    pub failures: Vec<LoadError>,
}

/// Scan `dir` for plugin packages, sorted by file name.
///
/// Sub-directories without a descriptor are plugin data directories and are
/// skipped silently, as are plain files that are not `.zip` archives.
///
/// Packages and data directories share the plugin root. A directory package
/// whose folder name equals its lowercased plugin name doubles as its own
/// data directory: bundled resources and `config.yml` land next to its
/// descriptor. Ship directory packages under another folder name, or as
/// `.zip` archives, to keep the two apart.
pub fn discover(dir: &Path) -> io::Result<Discovery> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut discovery = Discovery::default();
    for path in entries {
        let candidate = if path.is_dir() {
            DESCRIPTOR_FILES.iter().any(|name| path.join(name).is_file())
        } else {
            is_archive(&path)
        };
        if !candidate {
            debug!("Skipping {:?}: not a plugin package", path);
            continue;
        }

        match PluginPackage::open(&path) {
            Ok(package) => {
                debug!(
                    "Discovered plugin {} v{} at {:?}",
                    package.descriptor.name, package.descriptor.version, path
                );
                discovery.packages.push(package);
            }
            Err(err) => {
                warn!("Skipping plugin package {:?}: {}", path, err);
                discovery.failures.push(err);
            }
        }
    }
    Ok(discovery)
}

fn is_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

fn open_zip(path: &Path) -> Result<ZipArchive<fs::File>, LoadError> {
    let file = fs::File::open(path).map_err(|e| malformed(path, e.to_string()))?;
    ZipArchive::new(file).map_err(|e| malformed(path, format!("failed to read zip archive: {}", e)))
}

fn malformed(path: &Path, reason: impl Into<String>) -> LoadError {
    LoadError::MalformedPackage {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn descriptor_format(path: &Path) -> Option<FileFormat> {
    match path.extension()?.to_str()? {
        "yaml" | "yml" => Some(FileFormat::Yaml),
        "toml" => Some(FileFormat::Toml),
        "json" => Some(FileFormat::Json),
        _ => None,
    }
}

/// Parse descriptor text, picking the format from the file extension.
pub(crate) fn parse_descriptor(path: &Path, content: &str) -> Result<PluginDescriptor, LoadError> {
    let format = descriptor_format(path).ok_or_else(|| malformed(path, "unsupported descriptor format"))?;
    Cfg::builder()
        .add_source(File::from_str(content, format))
        .build()
        .and_then(|cfg| cfg.try_deserialize::<PluginDescriptor>())
        .map_err(|e| malformed(path, e.to_string()))
}

/// A relative, `/`-separated path that stays inside its base directory.
pub(crate) fn is_safe_resource_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('\\')
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
