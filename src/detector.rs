// 该文件是 dpu-detect 项目的一部分。
// src/detector.rs - 检测器适配层
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::{ConfigError, EngineConfig},
  model::{EngineError, InferenceEngine, RawBox},
};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("模型加载失败: {0}")]
  ModelLoad(EngineError),
  #[error("推理失败: {0}")]
  Inference(EngineError),
  #[error("图像无效: {0}x{1}")]
  InvalidImage(u32, u32),
}

/// 像素坐标下的检测结果，未裁剪到图像边界
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub label: u32,
  pub score: f32,
  pub x_min: f32,
  pub y_min: f32,
  pub width: f32,
  pub height: f32,
}

impl Detection {
  /// 以原始图像尺寸将归一化检测框换算到像素坐标
  pub fn from_normalized(raw: &RawBox, image_width: u32, image_height: u32) -> Self {
    let (w, h) = (image_width as f32, image_height as f32);
    Detection {
      label: raw.label,
      score: raw.score,
      x_min: raw.x * w,
      y_min: raw.y * h,
      width: raw.width * w,
      height: raw.height * h,
    }
  }
}

/// 独占推理引擎的检测器
pub struct Detector<E> {
  engine: E,
}

impl<E: InferenceEngine> Detector<E> {
  /// 读取配置并加载模型，任一步失败都不保留部分状态
  pub fn initialize(config_path: &Path, model_path: &Path) -> Result<Self, DetectError> {
    let config = EngineConfig::from_file(config_path)?;
    let engine = E::load(&config, model_path).map_err(DetectError::ModelLoad)?;
    Ok(Self::with_engine(engine))
  }

  pub fn with_engine(engine: E) -> Self {
    let (w, h) = engine.input_size();
    info!("检测器就绪, 模型输入尺寸: {}x{}", w, h);
    Detector { engine }
  }

  pub fn input_size(&self) -> (u32, u32) {
    self.engine.input_size()
  }

  /// 缩放到模型输入尺寸（不保持宽高比）后推理一次
  pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
      return Err(DetectError::InvalidImage(img_w, img_h));
    }

    let (input_w, input_h) = self.engine.input_size();
    let resized;
    let input = if (img_w, img_h) == (input_w, input_h) {
      image
    } else {
      debug!("缩放图像 {}x{} -> {}x{}", img_w, img_h, input_w, input_h);
      resized = image::imageops::resize(image, input_w, input_h, FilterType::Triangle);
      &resized
    };

    let boxes = self.engine.run(input).map_err(DetectError::Inference)?;
    debug!("引擎返回 {} 个检测框", boxes.len());

    Ok(
      boxes
        .iter()
        .map(|raw| Detection::from_normalized(raw, img_w, img_h))
        .collect(),
    )
  }
}
