// 该文件是 dpu-detect 项目的一部分。
// src/error.rs - 程序级错误与退出码
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

use thiserror::Error;

use crate::{
  config::ConfigError, detector::DetectError, input::ImageFileInputError, labels::UnknownLabel,
  model::EngineError, output::OutputError,
};

/// 命令行参数错误的退出码，与 [`AppError::exit_code`] 的各类失败互不重叠
pub const USAGE_EXIT_CODE: u8 = 1;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("未知模式: {0}")]
  UnknownMode(String),
  #[error("配置解析失败: {0}")]
  ConfigParse(#[from] ConfigError),
  #[error("模型加载失败: {0}")]
  ModelLoad(EngineError),
  #[error("推理后端 {0} 未编译")]
  BackendUnavailable(&'static str),
  #[error("图像无效: {0}")]
  InvalidImage(String),
  #[error("推理失败: {0}")]
  Inference(EngineError),
  #[error("{0}")]
  UnknownLabel(#[from] UnknownLabel),
  #[error("输出失败: {0}")]
  Output(#[from] OutputError),
}

impl AppError {
  /// 每类失败对应一个独立的非零退出码
  pub fn exit_code(&self) -> u8 {
    match self {
      AppError::UnknownMode(_) => 2,
      AppError::ConfigParse(_) => 3,
      AppError::ModelLoad(_) | AppError::BackendUnavailable(_) => 4,
      AppError::InvalidImage(_) => 5,
      AppError::Inference(_) => 6,
      AppError::UnknownLabel(_) => 7,
      AppError::Output(_) => 8,
    }
  }
}

impl From<DetectError> for AppError {
  fn from(err: DetectError) -> Self {
    match err {
      DetectError::Config(e) => AppError::ConfigParse(e),
      DetectError::ModelLoad(e) => AppError::ModelLoad(e),
      DetectError::Inference(e) => AppError::Inference(e),
      DetectError::InvalidImage(w, h) => AppError::InvalidImage(format!("尺寸为 {}x{}", w, h)),
    }
  }
}

impl From<ImageFileInputError> for AppError {
  fn from(err: ImageFileInputError) -> Self {
    AppError::InvalidImage(err.to_string())
  }
}
