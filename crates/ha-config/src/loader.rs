//! YAML loader with Home Assistant's custom tags
//!
//! - `!include path`
//! - `!include_dir_list dir`, `!include_dir_merge_list dir`
//! - `!include_dir_named dir`, `!include_dir_merge_named dir`
//! - `!secret key` (from `secrets.yaml` in the config directory)
//! - `!env_var VAR`

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
enum DirInclude {
    List,
    MergeList,
    Named,
    MergeNamed,
}

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: HashMap<String, String>,
    /// Files currently being loaded, for circular include detection
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a loader for `config_dir`, reading `secrets.yaml` if present
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = load_secrets(&config_dir.join("secrets.yaml"))?;
        Ok(Self {
            config_dir,
            secrets,
            include_stack: HashSet::new(),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = match path.as_ref() {
            p if p.is_absolute() => p.to_path_buf(),
            p => self.config_dir.join(p),
        };
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);
        result
    }

    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.resolve(value, source_path)
    }

    fn resolve(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                trace!("Resolving tag {}", tag);
                match tag.as_str() {
                    "!include" => {
                        let path = self.tag_path(&tagged.value, source_path)?;
                        self.load_file(path)
                    }
                    "!include_dir_list" => self.include_dir(&tagged.value, source_path, DirInclude::List),
                    "!include_dir_merge_list" => {
                        self.include_dir(&tagged.value, source_path, DirInclude::MergeList)
                    }
                    "!include_dir_named" => self.include_dir(&tagged.value, source_path, DirInclude::Named),
                    "!include_dir_merge_named" => {
                        self.include_dir(&tagged.value, source_path, DirInclude::MergeNamed)
                    }
                    "!secret" => {
                        let key = tag_string(&tagged.value, "!secret")?;
                        self.secrets
                            .get(key)
                            .map(|s| Value::String(s.clone()))
                            .ok_or_else(|| ConfigError::SecretNotFound {
                                key: key.to_string(),
                            })
                    }
                    "!env_var" => {
                        let var = tag_string(&tagged.value, "!env_var")?;
                        std::env::var(var)
                            .map(Value::String)
                            .map_err(|_| ConfigError::EnvVarNotFound {
                                var: var.to_string(),
                            })
                    }
                    _ => {
                        let inner = self.resolve(tagged.value, source_path)?;
                        Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                            tag: tagged.tag,
                            value: inner,
                        })))
                    }
                }
            }
            Value::Mapping(map) => {
                let mut resolved = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    resolved.insert(self.resolve(k, source_path)?, self.resolve(v, source_path)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn include_dir(&mut self, value: &Value, source_path: &Path, mode: DirInclude) -> ConfigResult<Value> {
        let dir = self.tag_path(value, source_path)?;
        debug!("Including directory {:?} as {:?}", dir, mode);

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|source| ConfigError::ReadFile {
                path: dir.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        files.sort();

        let mut list = Vec::new();
        let mut named = Mapping::new();
        for file in files {
            let content = self.load_file(&file)?;
            match mode {
                DirInclude::List => list.push(content),
                DirInclude::MergeList => match content {
                    Value::Sequence(seq) => list.extend(seq),
                    other => list.push(other),
                },
                DirInclude::Named => {
                    let stem = file
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                    named.insert(Value::String(stem), content);
                }
                DirInclude::MergeNamed => {
                    if let Value::Mapping(map) = content {
                        named.extend(map);
                    }
                }
            }
        }

        Ok(match mode {
            DirInclude::List | DirInclude::MergeList => Value::Sequence(list),
            DirInclude::Named | DirInclude::MergeNamed => Value::Mapping(named),
        })
    }

    /// Resolve a tag argument relative to the including file
    fn tag_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let raw = value.as_str().ok_or_else(|| ConfigError::InvalidIncludePath {
            path: format!("{:?}", value),
            reason: "path must be a string".to_string(),
        })?;
        let base = source_path.parent().unwrap_or(&self.config_dir);
        Ok(base.join(raw))
    }
}

fn tag_string<'a>(value: &'a Value, tag: &str) -> ConfigResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| ConfigError::invalid(tag, "argument must be a string"))
}

fn load_secrets(path: &Path) -> ConfigResult<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: HashMap<String, Value> =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
            path: path.to_path_buf(),
            source,
        })?;

    let secrets: HashMap<String, String> = raw
        .into_iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => String::new(),
            };
            (k, s)
        })
        .collect();
    debug!("Loaded {} secrets", secrets.len());
    Ok(secrets)
}

/// Load a YAML file from `config_dir` with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

/// Load a YAML string with tag processing, resolving includes from `config_dir`
pub fn load_yaml_string(config_dir: impl Into<PathBuf>, content: &str) -> ConfigResult<Value> {
    let mut loader = YamlLoader::new(config_dir)?;
    let source = loader.config_dir().join("configuration.yaml");
    loader.load_string(content, &source)
}
