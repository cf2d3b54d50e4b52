// 该文件是 dpu-detect 项目的一部分。
// src/model.rs - 推理引擎接口
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

use image::RgbImage;
use thiserror::Error;

use crate::config::EngineConfig;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("模型加载错误: {0}, 错误: {1}")]
  ModelLoad(String, std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理错误: {0}")]
  Inference(String),
}

impl EngineError {
  pub fn invalid(msg: impl Into<String>) -> Self {
    EngineError::ModelInvalid(msg.into())
  }

  pub fn inference(msg: impl Into<String>) -> Self {
    EngineError::Inference(msg.into())
  }
}

/// 引擎原生检测框，坐标为相对模型输入的归一化值，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
  pub label: u32,
  pub score: f32,
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl RawBox {
  pub fn iou(&self, other: &RawBox) -> f32 {
    let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
    let inter_h =
      ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = self.width * self.height + other.width * other.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
  }
}

/// 推理引擎能力接口：加载配置与模型、执行一次推理
///
/// 引擎句柄由检测器独占，一次只允许一个推理请求。
pub trait InferenceEngine {
  fn load(config: &EngineConfig, model_path: &Path) -> Result<Self, EngineError>
  where
    Self: Sized;

  /// 模型要求的输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  /// 输入图像必须已经缩放到 [`InferenceEngine::input_size`]，批大小固定为 1
  fn run(&mut self, input: &RgbImage) -> Result<Vec<RawBox>, EngineError>;
}

pub mod yolov3;

#[cfg(feature = "backend-tract")]
mod tract;
#[cfg(feature = "backend-tract")]
pub use self::tract::TractEngine;

#[cfg(feature = "rknn")]
mod rknn;
#[cfg(feature = "rknn")]
pub use self::rknn::RknnEngine;
