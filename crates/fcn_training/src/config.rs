use std::path::{Path, PathBuf};

use fcn_models::SkipFusion;
use road_dataset::ImageShape;
use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "fcn-road.toml";
const CONFIG_ENV: &str = "FCN_ROAD_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub num_classes: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub image_shape: ImageShape,
    pub data_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// Pretrained backbone directory; `<data_dir>/vgg` when unset.
    pub vgg_dir: Option<PathBuf>,
    pub keep_prob: f64,
    pub learning_rate: f64,
    pub l2_scale: f64,
    /// Add the L2 penalty to the minimized loss; off keeps it attached to the decoder only.
    pub add_l2_to_loss: bool,
    pub fusion: SkipFusion,
    pub freeze_backbone: bool,
    /// Fail when file counts differ from the official KITTI road release.
    pub strict_layout: bool,
    pub seed: Option<u64>,
    pub checkpoint_name: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_classes: 2,
            epochs: 50,
            batch_size: 100,
            image_shape: ImageShape::new(160, 576),
            data_dir: PathBuf::from("./data"),
            runs_dir: PathBuf::from("./runs"),
            vgg_dir: None,
            keep_prob: 1.0,
            learning_rate: 1e-3,
            l2_scale: 1e-3,
            add_l2_to_loss: false,
            fusion: SkipFusion::Cascade,
            freeze_backbone: false,
            strict_layout: false,
            seed: None,
            checkpoint_name: "fcn8_road.bin".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RunConfigFile {
    num_classes: Option<usize>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    image_height: Option<u32>,
    image_width: Option<u32>,
    data_dir: Option<String>,
    runs_dir: Option<String>,
    vgg_dir: Option<String>,
    strict_layout: Option<bool>,
    seed: Option<u64>,
    checkpoint_name: Option<String>,
    step: Option<StepSection>,
    model: Option<ModelSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StepSection {
    keep_prob: Option<f64>,
    learning_rate: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelSection {
    l2_scale: Option<f64>,
    add_l2_to_loss: Option<bool>,
    fusion: Option<String>,
    freeze_backbone: Option<bool>,
}

impl RunConfig {
    /// Resolve the config file: explicit path, then `FCN_ROAD_CONFIG`, then `./fcn-road.toml`.
    ///
    /// A named file that is missing is an error; the implicit default file is optional.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let default = Path::new(DEFAULT_CONFIG_NAME);
        if default.exists() {
            return Self::from_path(default);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        Self::from_toml(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let file: RunConfigFile = toml::from_str(raw)?;
        Self::from_file(file)
    }

    fn from_file(file: RunConfigFile) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let step = file.step.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let fusion = match model.fusion.as_deref() {
            None => defaults.fusion,
            Some(raw) => parse_fusion(raw)?,
        };
        Ok(RunConfig {
            num_classes: file.num_classes.unwrap_or(defaults.num_classes),
            epochs: file.epochs.unwrap_or(defaults.epochs),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            image_shape: ImageShape::new(
                file.image_height.unwrap_or(defaults.image_shape.height),
                file.image_width.unwrap_or(defaults.image_shape.width),
            ),
            data_dir: file
                .data_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.data_dir),
            runs_dir: file
                .runs_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.runs_dir),
            vgg_dir: file.vgg_dir.map(|v| expand_path(&v)),
            keep_prob: step.keep_prob.unwrap_or(defaults.keep_prob),
            learning_rate: step.learning_rate.unwrap_or(defaults.learning_rate),
            l2_scale: model.l2_scale.unwrap_or(defaults.l2_scale),
            add_l2_to_loss: model.add_l2_to_loss.unwrap_or(defaults.add_l2_to_loss),
            fusion,
            freeze_backbone: model.freeze_backbone.unwrap_or(defaults.freeze_backbone),
            strict_layout: file.strict_layout.unwrap_or(defaults.strict_layout),
            seed: file.seed,
            checkpoint_name: file
                .checkpoint_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(defaults.checkpoint_name),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_classes == 0 {
            anyhow::bail!("num_classes must be at least 1");
        }
        if self.epochs == 0 {
            anyhow::bail!("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        self.image_shape.validate()?;
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            anyhow::bail!("keep_prob {} must be in (0, 1]", self.keep_prob);
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            anyhow::bail!("learning_rate {} must be positive", self.learning_rate);
        }
        if !(self.l2_scale.is_finite() && self.l2_scale >= 0.0) {
            anyhow::bail!("l2_scale {} must be non-negative", self.l2_scale);
        }
        Ok(())
    }

    pub fn vgg_dir(&self) -> PathBuf {
        self.vgg_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("vgg"))
    }

    /// The `data_road` directory holding the KITTI splits.
    pub fn dataset_root(&self) -> PathBuf {
        self.data_dir.join("data_road")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.runs_dir.join(&self.checkpoint_name)
    }
}

pub fn parse_fusion(raw: &str) -> anyhow::Result<SkipFusion> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "cascade" => Ok(SkipFusion::Cascade),
        "direct" => Ok(SkipFusion::Direct),
        other => anyhow::bail!("unknown fusion '{other}' (expected cascade or direct)"),
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if out == "~" || out.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{}", &out[1..]);
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_references_expand() {
        std::env::set_var("FCN_ROAD_TEST_ROOT", "/mnt/kitti");
        assert_eq!(
            expand_env("${FCN_ROAD_TEST_ROOT}/data"),
            "/mnt/kitti/data".to_string()
        );
        assert_eq!(expand_env("${FCN_ROAD_UNSET_VAR}/x"), "${FCN_ROAD_UNSET_VAR}/x");
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }

    #[test]
    fn only_bare_tilde_means_home() {
        std::env::set_var("HOME", "/home/runner");
        assert_eq!(expand_path("~"), PathBuf::from("/home/runner"));
        assert_eq!(expand_path("~/kitti"), PathBuf::from("/home/runner/kitti"));
        assert_eq!(expand_path("~alice/data"), PathBuf::from("~alice/data"));
        assert_eq!(expand_path("data/~"), PathBuf::from("data/~"));
    }
}
