//! Staged configuration files.
//!
//! A file maps stage names to ordered steps. Only the `layout` directive of a step is
//! read here; other directives belong to other executors and are ignored, so files
//! written for the full provisioning run load unchanged. Keys are accepted in snake_case
//! and in PascalCase.

use crate::errors::StratumError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use stratum_hal::{DeviceSelector, ExpandSize, PartitionRequest};

pub const DEFAULT_FILESYSTEM: &str = "ext2";

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageConfig {
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Stages")]
    pub stages: BTreeMap<String, Vec<Step>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Step {
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(default, alias = "Layout")]
    pub layout: Option<Layout>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Layout {
    #[serde(default, alias = "Device")]
    pub device: DeviceConfig,
    #[serde(default, alias = "Parts")]
    pub parts: Vec<PartConfig>,
    #[serde(default, alias = "Expand")]
    pub expand: Option<ExpandConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    #[serde(default, alias = "Path")]
    pub path: Option<PathBuf>,
    #[serde(default, alias = "Label")]
    pub label: Option<String>,
    #[serde(default, alias = "InitDisk")]
    pub init_disk: bool,
    #[serde(default, alias = "DiskName")]
    pub disk_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartConfig {
    /// MiB
    #[serde(default, alias = "Size")]
    pub size: u64,
    #[serde(default, alias = "PLabel")]
    pub plabel: Option<String>,
    #[serde(default, alias = "FSLabel")]
    pub fslabel: Option<String>,
    #[serde(default = "default_filesystem", alias = "FileSystem")]
    pub filesystem: String,
    #[serde(default, alias = "FormatOptions")]
    pub format_options: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpandConfig {
    /// MiB; 0 grows to the end of the disk.
    #[serde(default, alias = "Size")]
    pub size: u64,
}

fn default_filesystem() -> String {
    DEFAULT_FILESYSTEM.to_string()
}

impl Layout {
    pub fn selector(&self) -> stratum_hal::HalResult<DeviceSelector> {
        DeviceSelector::new(self.device.path.clone(), self.device.label.clone())
    }

    pub fn requests(&self) -> Vec<PartitionRequest> {
        self.parts.iter().map(PartConfig::request).collect()
    }

    pub fn expand_size(&self) -> Option<ExpandSize> {
        self.expand.as_ref().map(|e| ExpandSize::from_mib(e.size))
    }
}

impl PartConfig {
    pub fn request(&self) -> PartitionRequest {
        let filesystem = if self.filesystem.trim().is_empty() {
            DEFAULT_FILESYSTEM
        } else {
            self.filesystem.as_str()
        };
        PartitionRequest {
            size_mib: self.size,
            plabel: self.plabel.clone(),
            fslabel: self.fslabel.clone(),
            filesystem: filesystem.to_string(),
            format_options: self.format_options.clone(),
        }
    }
}

/// A layout step together with where it came from.
#[derive(Debug, Clone)]
pub struct LayoutStep {
    pub source: PathBuf,
    pub name: String,
    pub layout: Layout,
}

/// Parsed configuration files, in load order.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub files: Vec<(PathBuf, StageConfig)>,
}

impl Sources {
    /// Load every file named in `paths`; directories contribute their config files
    /// sorted by name.
    pub fn load(paths: &[PathBuf]) -> Result<Self, StratumError> {
        let mut files = Vec::new();
        for path in paths {
            for file in expand_source(path)? {
                let config = parse_file(&file)?;
                log::debug!(
                    "loaded {} ({} stage(s))",
                    file.display(),
                    config.stages.len()
                );
                files.push((file, config));
            }
        }
        Ok(Self { files })
    }

    /// Layout steps of `stage`, in file order then step order.
    pub fn layout_steps(&self, stage: &str) -> Vec<LayoutStep> {
        self.files
            .iter()
            .filter_map(|(source, config)| {
                config.stages.get(stage).map(|steps| (source, steps))
            })
            .flat_map(|(source, steps)| {
                steps.iter().filter_map(move |step| {
                    step.layout.as_ref().map(|layout| LayoutStep {
                        source: source.clone(),
                        name: step.name.clone(),
                        layout: layout.clone(),
                    })
                })
            })
            .collect()
    }
}

fn is_config_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn expand_source(path: &Path) -> Result<Vec<PathBuf>, StratumError> {
    let read_err = |source| StratumError::Read {
        path: path.to_path_buf(),
        source,
    };
    let meta = fs::metadata(path).map_err(read_err)?;
    if !meta.is_dir() {
        if !is_config_file(path) {
            return Err(StratumError::UnsupportedSource(path.to_path_buf()));
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let file = entry.path();
        if file.is_file() && is_config_file(&file) {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

pub fn parse_file(path: &Path) -> Result<StageConfig, StratumError> {
    let content = fs::read_to_string(path).map_err(|source| StratumError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(path, &content)
}

/// Parse `content` as JSON or YAML depending on `path`'s extension.
pub fn parse_str(path: &Path, content: &str) -> Result<StageConfig, StratumError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let parse_err = |message: String| StratumError::Parse {
        path: path.to_path_buf(),
        message,
    };

    if is_json {
        serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))
    } else if content.trim().is_empty() {
        Ok(StageConfig::default())
    } else {
        serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(content: &str) -> StageConfig {
        parse_str(Path::new("test.yaml"), content).unwrap()
    }

    #[test]
    fn snake_case_layout() {
        let config = yaml(
            r#"
name: Repartition
stages:
  rootfs:
    - name: Grow persistent
      layout:
        device: { label: COS_RECOVERY }
        parts:
          - { size: 1024, plabel: data, fslabel: DATA, filesystem: ext4 }
        expand: { size: 0 }
"#,
        );
        let step = &config.stages["rootfs"][0];
        let layout = step.layout.as_ref().unwrap();
        assert_eq!(step.name, "Grow persistent");
        assert_eq!(
            layout.selector().unwrap(),
            DeviceSelector::Label("COS_RECOVERY".into())
        );
        let request = &layout.requests()[0];
        assert_eq!(request.size_mib, 1024);
        assert_eq!(request.plabel.as_deref(), Some("data"));
        assert_eq!(request.fslabel.as_deref(), Some("DATA"));
        assert_eq!(request.filesystem, "ext4");
        assert_eq!(layout.expand_size(), Some(ExpandSize::Max));
    }

    #[test]
    fn pascal_case_layout_with_defaults() {
        let config = yaml(
            r#"
Stages:
  Initramfs:
    - Layout:
        Device:
          Path: /dev/vda
          InitDisk: true
          DiskName: main
        Parts:
          - Size: 64
            FSLabel: COS_OEM
        Expand:
          Size: 512
"#,
        );
        let layout = config.stages["Initramfs"][0].layout.clone().unwrap();
        assert_eq!(
            layout.selector().unwrap(),
            DeviceSelector::Path("/dev/vda".into())
        );
        assert!(layout.device.init_disk);
        assert_eq!(layout.device.disk_name.as_deref(), Some("main"));
        assert_eq!(layout.requests()[0].filesystem, DEFAULT_FILESYSTEM);
        assert_eq!(layout.expand_size(), Some(ExpandSize::MiB(512)));
    }

    #[test]
    fn missing_expand_means_no_expand() {
        let config = yaml(
            "stages:\n  boot:\n    - layout:\n        device: { path: /dev/sda }\n",
        );
        let layout = config.stages["boot"][0].layout.clone().unwrap();
        assert_eq!(layout.expand_size(), None);
        assert!(layout.requests().is_empty());
    }

    #[test]
    fn other_directives_are_ignored() {
        let config = yaml(
            r#"
stages:
  boot:
    - name: Set hostname
      hostname: node1
      commands: ["echo hi"]
    - name: Disk
      layout:
        device: { path: /dev/sda }
"#,
        );
        assert_eq!(config.stages["boot"].len(), 2);
        assert!(config.stages["boot"][0].layout.is_none());
        assert!(config.stages["boot"][1].layout.is_some());
    }

    #[test]
    fn json_sources_are_supported() {
        let config = parse_str(
            Path::new("layout.json"),
            r#"{"stages":{"boot":[{"layout":{"device":{"path":"/dev/sda"},"parts":[{"size":10,"fslabel":"X"}]}}]}}"#,
        )
        .unwrap();
        let layout = config.stages["boot"][0].layout.clone().unwrap();
        assert_eq!(layout.parts[0].size, 10);
        assert_eq!(layout.parts[0].filesystem, "ext2");
    }

    #[test]
    fn conflicting_selectors_are_rejected() {
        let config = yaml(
            "stages:\n  boot:\n    - layout:\n        device: { path: /dev/sda, label: X }\n",
        );
        let layout = config.stages["boot"][0].layout.clone().unwrap();
        assert!(layout.selector().is_err());
    }

    #[test]
    fn malformed_yaml_names_the_file() {
        let err = parse_str(Path::new("broken.yaml"), "stages: [").unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
