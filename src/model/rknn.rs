// 该文件是 dpu-detect 项目的一部分。
// src/model/rknn.rs - RKNN NPU 推理后端
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
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info, warn};

use crate::{
  config::{EngineConfig, YoloV3Param},
  model::{
    EngineError, InferenceEngine, RawBox,
    yolov3::{HeadTensor, postprocess},
  },
};

const RKNN_NUM_INPUTS: u32 = 1;

pub struct RknnEngine {
  context: Context,
  input_size: (u32, u32),
  yolo: YoloV3Param,
}

/// 由输出长度推算网格尺寸，假设网格宽高比与输入一致
fn grid_of(len: usize, channels: usize, (input_w, input_h): (u32, u32)) -> Option<(usize, usize)> {
  if channels == 0 || len % channels != 0 {
    return None;
  }
  let spatial = len / channels;
  if spatial == 0 {
    return None;
  }
  let stride = ((input_w as f64 * input_h as f64) / spatial as f64).sqrt().round() as u32;
  if stride == 0 {
    return None;
  }
  let (grid_w, grid_h) = ((input_w / stride) as usize, (input_h / stride) as usize);
  (grid_w * grid_h == spatial).then_some((grid_h, grid_w))
}

impl InferenceEngine for RknnEngine {
  fn load(config: &EngineConfig, model_path: &Path) -> Result<Self, EngineError> {
    let input_size = config.input_size_override().ok_or_else(|| {
      EngineError::invalid("RKNN 后端需要在配置中给出 input_width 与 input_height")
    })?;
    if !config.preprocess.is_default() {
      warn!("RKNN 后端在 NPU 上完成归一化, 忽略 [preprocess] 配置");
    }

    info!("加载模型文件: {}", model_path.display());
    let model_data = std::fs::read(model_path)
      .map_err(|e| EngineError::ModelLoad(model_path.display().to_string(), e))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, InitFlags::default()).map_err(|e| {
      EngineError::ModelLoad(
        model_path.display().to_string(),
        std::io::Error::other(e.to_string()),
      )
    })?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(EngineError::invalid(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| EngineError::invalid(format!("无法获取输入数量: {}", e)))?;
    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(EngineError::invalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    info!("模型加载完成, 输入尺寸: {}x{}", input_size.0, input_size.1);

    Ok(RknnEngine {
      context,
      input_size,
      yolo: config.yolo_v3.clone(),
    })
  }

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn run(&mut self, input: &RgbImage) -> Result<Vec<RawBox>, EngineError> {
    if input.dimensions() != self.input_size {
      return Err(EngineError::inference(format!(
        "输入尺寸 {}x{} 与模型输入 {}x{} 不一致",
        input.width(),
        input.height(),
        self.input_size.0,
        self.input_size.1
      )));
    }

    debug!("设置模型输入");
    self
      .context
      .set_input(0, input.as_raw(), TensorFormat::NHWC, TensorType::UInt8)
      .map_err(|e| EngineError::inference(e.to_string()))?;

    debug!("执行模型推理");
    self
      .context
      .run()
      .map_err(|e| EngineError::inference(e.to_string()))?;

    let num_outputs = self
      .context
      .num_outputs()
      .map_err(|e| EngineError::inference(e.to_string()))?;
    let output = self
      .context
      .get_outputs()
      .map_err(|e| EngineError::inference(e.to_string()))?;

    let channels = self.yolo.anchor_count * (5 + self.yolo.num_classes);
    let mut heads = Vec::with_capacity(num_outputs as usize);
    for idx in 0..num_outputs as usize {
      let data = output
        .get_f32(idx)
        .map_err(|e| EngineError::inference(format!("获取第 {} 个输出失败: {}", idx, e)))?;
      let (height, width) = grid_of(data.len(), channels, self.input_size).ok_or_else(|| {
        EngineError::invalid(format!("第 {} 个输出大小 {} 无法对应检测头", idx, data.len()))
      })?;
      heads.push(HeadTensor {
        data,
        height,
        width,
      });
    }

    postprocess(&heads, &self.yolo, self.input_size)
  }
}
