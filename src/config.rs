// 该文件是 dpu-detect 项目的一部分。
// src/config.rs - 推理引擎参数配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_SCALE: f32 = 0.00390625;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {0}: {1}")]
  Read(String, std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置参数无效: {0}")]
  Invalid(String),
}

/// 引擎参数，启动时解析一次，之后只读
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
  #[serde(default)]
  pub model: ModelParam,
  pub yolo_v3: YoloV3Param,
  #[serde(default)]
  pub preprocess: PreprocessParam,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelParam {
  #[serde(default)]
  pub name: Option<String>,
  /// 覆盖模型输入宽度（动态形状模型或无法查询输入属性的后端需要）
  #[serde(default)]
  pub input_width: Option<u32>,
  #[serde(default)]
  pub input_height: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct YoloV3Param {
  pub num_classes: usize,
  pub anchor_count: usize,
  pub conf_threshold: f32,
  pub nms_threshold: f32,
  /// 锚框尺寸，按 (w, h) 成对排列，从最小检测头开始
  pub biases: Vec<f32>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PreprocessParam {
  #[serde(default)]
  pub mean: [f32; 3],
  #[serde(default = "default_scale")]
  pub scale: [f32; 3],
}

impl Default for PreprocessParam {
  fn default() -> Self {
    Self {
      mean: [0.0; 3],
      scale: default_scale(),
    }
  }
}

impl PreprocessParam {
  /// 是否为默认归一化 (mean = 0, scale = 1/256)
  pub fn is_default(&self) -> bool {
    *self == Self::default()
  }
}

fn default_scale() -> [f32; 3] {
  [DEFAULT_SCALE; 3]
}

impl EngineConfig {
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    info!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)
      .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
    text.parse()
  }

  /// 模型输入尺寸覆盖值，宽高需同时给出
  pub fn input_size_override(&self) -> Option<(u32, u32)> {
    match (self.model.input_width, self.model.input_height) {
      (Some(w), Some(h)) => Some((w, h)),
      _ => None,
    }
  }

  /// 每个检测头对应的锚框组数
  pub fn head_count(&self) -> usize {
    self.yolo_v3.biases.len() / (2 * self.yolo_v3.anchor_count)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    let yolo = &self.yolo_v3;
    if yolo.num_classes == 0 {
      return Err(ConfigError::Invalid("num_classes 必须大于 0".into()));
    }
    if yolo.anchor_count == 0 {
      return Err(ConfigError::Invalid("anchor_count 必须大于 0".into()));
    }
    for (name, value) in [
      ("conf_threshold", yolo.conf_threshold),
      ("nms_threshold", yolo.nms_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
          "{} 必须位于 [0, 1] 区间, 实际为 {}",
          name, value
        )));
      }
    }
    if yolo.biases.is_empty() || yolo.biases.len() % (2 * yolo.anchor_count) != 0 {
      return Err(ConfigError::Invalid(format!(
        "biases 长度 {} 不是 2 * anchor_count ({}) 的整数倍",
        yolo.biases.len(),
        2 * yolo.anchor_count
      )));
    }
    match (self.model.input_width, self.model.input_height) {
      (None, None) => {}
      (Some(w), Some(h)) if w > 0 && h > 0 => {}
      _ => {
        return Err(ConfigError::Invalid(
          "input_width 与 input_height 必须同时给出且大于 0".into(),
        ));
      }
    }
    Ok(())
  }
}

impl std::str::FromStr for EngineConfig {
  type Err = ConfigError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let config: EngineConfig = toml::from_str(text)?;
    config.validate()?;
    debug!("引擎配置: {:?}", config);
    Ok(config)
  }
}
