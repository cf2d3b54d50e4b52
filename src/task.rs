// 该文件是 dpu-detect 项目的一部分。
// src/task.rs - 推理任务
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

use image::RgbImage;
use tracing::info;

use crate::{
  detector::Detector,
  error::AppError,
  model::InferenceEngine,
  output::{OutputError, Render, draw::Annotation},
};

/// 运行模式，目前只支持单张图像
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Image,
}

impl std::str::FromStr for Mode {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "image" => Ok(Mode::Image),
      other => Err(AppError::UnknownMode(other.to_string())),
    }
  }
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 加载图像后：推理一次、裁剪标注、交给输出
pub struct OneShotTask;

impl<'a, E, O> Task<&'a RgbImage, &'a mut Detector<E>, &'a O> for OneShotTask
where
  E: InferenceEngine,
  O: Render<RgbImage, [Annotation]>,
  OutputError: From<O::Error>,
{
  type Output = Vec<Annotation>;
  type Error = AppError;

  fn run_task(
    self,
    image: &'a RgbImage,
    detector: &'a mut Detector<E>,
    output: &'a O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let now = std::time::Instant::now();
    let detections = detector.detect(image)?;
    info!(
      "推理完成，耗时: {:.2?}, 检测到 {} 个目标",
      now.elapsed(),
      detections.len()
    );

    let (width, height) = image.dimensions();
    let annotations = detections
      .into_iter()
      .map(|d| Annotation::new(d, width, height))
      .collect::<Result<Vec<_>, _>>()?;

    let now = std::time::Instant::now();
    output
      .render_result(image, annotations.as_slice())
      .map_err(OutputError::from)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(annotations)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_image_mode_only() {
    assert_eq!("image".parse::<Mode>().unwrap(), Mode::Image);
    let err = "video".parse::<Mode>().unwrap_err();
    assert!(matches!(err, AppError::UnknownMode(ref m) if m == "video"));
    assert_ne!(err.exit_code(), 0);
  }
}
