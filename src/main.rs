// 该文件是 dpu-detect 项目的一部分。
// src/main.rs - 单张图像检测程序
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

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use dpu_detect::{
  detector::Detector,
  error::{AppError, USAGE_EXIT_CODE},
  input::read_image_file,
  model::InferenceEngine,
  output::{
    ConsoleOutput, OutputError, RecordOutput, SaveImageFileOutput,
    draw::{Draw, load_font},
  },
  task::{Mode, OneShotTask, Task},
};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Backend {
  /// tract ONNX CPU 推理
  Tract,
  /// RKNN NPU 推理
  Rknn,
}

/// 单张图像 YOLOv3 检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// 引擎配置文件 (TOML)
  #[arg(value_name = "CONFIG")]
  config: PathBuf,
  /// 模型文件路径
  #[arg(value_name = "MODEL")]
  model: PathBuf,
  /// 输入图像路径
  #[arg(value_name = "IMAGE")]
  image: PathBuf,
  /// 运行模式，目前只支持 image
  #[arg(value_name = "MODE")]
  mode: String,
  /// 标注结果图像输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "result.jpg")]
  output: PathBuf,
  /// 检测记录输出路径 (JSON Lines)
  #[arg(long, value_name = "RECORDS")]
  records: Option<PathBuf>,
  /// 标签字体文件 (TTF/OTF)，不给出时只绘制边框
  #[arg(long, value_name = "FONT")]
  font: Option<PathBuf>,
  /// 推理后端
  #[arg(long, value_enum, default_value = "tract")]
  backend: Backend,
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(e) => {
      let _ = e.print();
      // --help 与 --version 不算失败
      return if e.use_stderr() {
        ExitCode::from(USAGE_EXIT_CODE)
      } else {
        ExitCode::SUCCESS
      };
    }
  };

  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{}", e);
      ExitCode::from(e.exit_code())
    }
  }
}

fn run(args: &Args) -> Result<(), AppError> {
  let mode: Mode = args.mode.parse()?;

  info!("配置文件路径: {}", args.config.display());
  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.image.display());
  info!("推理后端: {:?}", args.backend);

  match args.backend {
    Backend::Tract => run_tract(args, mode),
    Backend::Rknn => run_rknn(args, mode),
  }
}

#[cfg(feature = "backend-tract")]
fn run_tract(args: &Args, mode: Mode) -> Result<(), AppError> {
  run_with::<dpu_detect::model::TractEngine>(args, mode)
}

#[cfg(not(feature = "backend-tract"))]
fn run_tract(_args: &Args, _mode: Mode) -> Result<(), AppError> {
  Err(AppError::BackendUnavailable("tract"))
}

#[cfg(feature = "rknn")]
fn run_rknn(args: &Args, mode: Mode) -> Result<(), AppError> {
  run_with::<dpu_detect::model::RknnEngine>(args, mode)
}

#[cfg(not(feature = "rknn"))]
fn run_rknn(_args: &Args, _mode: Mode) -> Result<(), AppError> {
  Err(AppError::BackendUnavailable("rknn"))
}

fn run_with<E: InferenceEngine>(args: &Args, mode: Mode) -> Result<(), AppError> {
  let mut detector = Detector::<E>::initialize(&args.config, &args.model)?;
  info!("模型初始化完成");

  match mode {
    Mode::Image => {
      let image = read_image_file(&args.image)?;

      let draw = match &args.font {
        Some(path) => Draw::default().with_font(load_font(path).map_err(OutputError::from)?),
        None => Draw::default(),
      };
      let output = (
        ConsoleOutput::stdout(),
        (
          SaveImageFileOutput::new(&args.output, draw),
          args.records.as_ref().map(|path| RecordOutput::new(path, 0)),
        ),
      );

      let annotations = OneShotTask.run_task(&image, &mut detector, &output)?;
      info!(
        "共 {} 个目标, 结果图像: {}",
        annotations.len(),
        output.1.0.path().display()
      );
    }
  }

  Ok(())
}
