// 该文件是 dpu-detect 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX CPU 推理后端
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
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::{
  config::{EngineConfig, PreprocessParam, YoloV3Param},
  model::{
    EngineError, InferenceEngine, RawBox,
    yolov3::{HeadTensor, postprocess},
  },
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct TractEngine {
  plan: Plan,
  input_size: (u32, u32),
  yolo: YoloV3Param,
  preprocess: PreprocessParam,
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> EngineError {
  EngineError::ModelLoad(
    path.display().to_string(),
    std::io::Error::other(e.to_string()),
  )
}

impl InferenceEngine for TractEngine {
  fn load(config: &EngineConfig, model_path: &Path) -> Result<Self, EngineError> {
    info!("加载模型文件: {}", model_path.display());
    if !model_path.is_file() {
      return Err(EngineError::ModelLoad(
        model_path.display().to_string(),
        std::io::Error::new(std::io::ErrorKind::NotFound, "模型文件不存在"),
      ));
    }

    let mut model = tract_onnx::onnx()
      .model_for_path(model_path)
      .map_err(|e| load_error(model_path, e))?;

    if let Some((w, h)) = config.input_size_override() {
      debug!("使用配置中的输入尺寸: {}x{}", w, h);
      model = model
        .with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, h as usize, w as usize)),
        )
        .map_err(|e| load_error(model_path, e))?;
    }

    let plan = model
      .into_optimized()
      .and_then(|m| m.into_runnable())
      .map_err(|e| load_error(model_path, e))?;

    let shape = plan
      .model()
      .input_fact(0)
      .map_err(|e| EngineError::invalid(e.to_string()))?
      .shape
      .as_concrete()
      .map(|s| s.to_vec())
      .ok_or_else(|| EngineError::invalid("模型输入形状不固定，请在配置中给出输入尺寸"))?;

    let input_size = match shape.as_slice() {
      [1, 3, h, w] => (*w as u32, *h as u32),
      other => {
        return Err(EngineError::invalid(format!(
          "预期模型输入形状为 [1, 3, H, W], 实际为 {:?}",
          other
        )));
      }
    };
    info!("模型加载完成, 输入尺寸: {}x{}", input_size.0, input_size.1);

    Ok(TractEngine {
      plan,
      input_size,
      yolo: config.yolo_v3.clone(),
      preprocess: config.preprocess.clone(),
    })
  }

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn run(&mut self, input: &RgbImage) -> Result<Vec<RawBox>, EngineError> {
    let (w, h) = self.input_size;
    if input.dimensions() != (w, h) {
      return Err(EngineError::inference(format!(
        "输入尺寸 {}x{} 与模型输入 {}x{} 不一致",
        input.width(),
        input.height(),
        w,
        h
      )));
    }

    let PreprocessParam { mean, scale } = self.preprocess;
    let tensor: Tensor =
      tract_ndarray::Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        (input.get_pixel(x as u32, y as u32)[c] as f32 - mean[c]) * scale[c]
      })
      .into();

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| EngineError::inference(e.to_string()))?;

    let mut heads = Vec::with_capacity(outputs.len());
    for (idx, output) in outputs.iter().enumerate() {
      let (height, width) = match output.shape() {
        [1, _, h, w] => (*h, *w),
        other => {
          return Err(EngineError::invalid(format!(
            "第 {} 个输出形状 {:?} 不是 [1, C, H, W]",
            idx, other
          )));
        }
      };
      let data = output
        .as_slice::<f32>()
        .map_err(|e| EngineError::invalid(format!("第 {} 个输出不是 f32: {}", idx, e)))?;
      heads.push(HeadTensor {
        data,
        height,
        width,
      });
    }

    postprocess(&heads, &self.yolo, self.input_size)
  }
}
