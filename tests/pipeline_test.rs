// 该文件是 dpu-detect 项目的一部分。
// tests/pipeline_test.rs - 单张图像检测流程集成测试
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

use std::{collections::BTreeMap, path::Path};

use image::{Rgb, RgbImage};

use dpu_detect::{
  config::EngineConfig,
  detector::{DetectError, Detector},
  error::AppError,
  input::read_image_file,
  model::{EngineError, InferenceEngine, RawBox},
  output::{ConsoleOutput, RecordOutput, SaveImageFileOutput, draw::Draw},
  task::{OneShotTask, Task},
};

const CONFIG: &str = r#"
[model]
name = "mock"
input_width = 64
input_height = 32

[yolo_v3]
num_classes = 80
anchor_count = 3
conf_threshold = 0.3
nms_threshold = 0.45
biases = [10, 13, 16, 30, 33, 23, 30, 61, 62, 45, 59, 119, 116, 90, 156, 198, 373, 326]
"#;

/// 按配置决定输入尺寸，返回预设检测框的引擎
struct MockEngine {
  input_size: (u32, u32),
  boxes: Vec<RawBox>,
}

impl InferenceEngine for MockEngine {
  fn load(config: &EngineConfig, model_path: &Path) -> Result<Self, EngineError> {
    let data = std::fs::read(model_path)
      .map_err(|e| EngineError::ModelLoad(model_path.display().to_string(), e))?;
    if data != b"mock-model" {
      return Err(EngineError::invalid("不是 mock 模型"));
    }
    let input_size = config
      .input_size_override()
      .ok_or_else(|| EngineError::invalid("缺少输入尺寸"))?;
    Ok(MockEngine {
      input_size,
      boxes: Vec::new(),
    })
  }

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn run(&mut self, input: &RgbImage) -> Result<Vec<RawBox>, EngineError> {
    if input.dimensions() != self.input_size {
      return Err(EngineError::inference("输入尺寸不一致"));
    }
    Ok(self.boxes.clone())
  }
}

struct Workspace {
  dir: tempfile::TempDir,
}

impl Workspace {
  fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
    std::fs::write(dir.path().join("model.bin"), b"mock-model").unwrap();
    RgbImage::from_pixel(100, 50, Rgb([10, 20, 30]))
      .save(dir.path().join("input.png"))
      .unwrap();
    Workspace { dir }
  }

  fn path(&self, name: &str) -> std::path::PathBuf {
    self.dir.path().join(name)
  }

  fn detector(&self, boxes: Vec<RawBox>) -> Detector<MockEngine> {
    let mut engine = MockEngine::load(
      &EngineConfig::from_file(&self.path("config.toml")).unwrap(),
      &self.path("model.bin"),
    )
    .unwrap();
    engine.boxes = boxes;
    Detector::with_engine(engine)
  }
}

fn raw(label: u32, score: f32, x: f32, y: f32, width: f32, height: f32) -> RawBox {
  RawBox {
    label,
    score,
    x,
    y,
    width,
    height,
  }
}

#[test]
fn initialize_reads_config_and_model() {
  let ws = Workspace::new();
  let detector =
    Detector::<MockEngine>::initialize(&ws.path("config.toml"), &ws.path("model.bin")).unwrap();
  assert_eq!(detector.input_size(), (64, 32));
}

#[test]
fn initialize_rejects_bad_config_before_loading_model() {
  let ws = Workspace::new();
  std::fs::write(ws.path("config.toml"), "[yolo_v3]\nnum_classes = \"many\"\n").unwrap();
  let err = Detector::<MockEngine>::initialize(&ws.path("config.toml"), &ws.path("model.bin"))
    .err()
    .unwrap();
  assert!(matches!(err, DetectError::Config(_)));
  assert_eq!(AppError::from(err).exit_code(), 3);
}

#[test]
fn initialize_reports_model_load_failure() {
  let ws = Workspace::new();
  let err = Detector::<MockEngine>::initialize(&ws.path("config.toml"), &ws.path("missing.bin"))
    .err()
    .unwrap();
  assert!(matches!(err, DetectError::ModelLoad(EngineError::ModelLoad(_, _))));
  assert_eq!(AppError::from(err).exit_code(), 4);
}

#[test]
fn one_shot_writes_image_records_and_console_lines() {
  let ws = Workspace::new();
  let mut detector = ws.detector(vec![
    raw(0, 0.9, 0.125, 0.25, 0.25, 0.5),
    raw(16, 0.6, 0.875, 0.875, 0.25, 0.25),
  ]);
  let image = read_image_file(&ws.path("input.png")).unwrap();
  let output = (
    ConsoleOutput::new(Vec::new()),
    (
      SaveImageFileOutput::new(ws.path("out/result.png"), Draw::default()),
      Some(RecordOutput::new(ws.path("out/records.jsonl"), 0)),
    ),
  );

  let annotations = OneShotTask
    .run_task(&image, &mut detector, &output)
    .unwrap();
  assert_eq!(annotations.len(), 2);
  assert_eq!(annotations[0].label, "person");
  assert_eq!(annotations[1].label, "dog");
  // 越界的检测框在绘制前被裁剪
  assert_eq!(annotations[1].clip.xmax, 99.0);
  assert_eq!(annotations[1].clip.ymax, 49.0);

  let console = String::from_utf8(output.0.into_inner()).unwrap();
  assert_eq!(console.lines().count(), 2);
  assert!(console.starts_with("person 0.9 12.5 37.5 12.5 37.5\n"));

  let saved = image::open(ws.path("out/result.png")).unwrap().into_rgb8();
  assert_eq!(saved.dimensions(), (100, 50));
  assert_eq!(saved.get_pixel(12, 12), &Rgb([0, 255, 0]));
  assert_eq!(saved.get_pixel(50, 45), &Rgb([10, 20, 30]));

  let records = std::fs::read_to_string(ws.path("out/records.jsonl")).unwrap();
  let second: BTreeMap<String, String> =
    serde_json::from_str(records.lines().nth(1).unwrap()).unwrap();
  // 记录保留未裁剪的原始坐标
  assert_eq!(second["x"], "87.500000");
  assert_eq!(second["width"], "25.000000");
  assert_eq!(second["frame_id"], "0");
}

#[test]
fn one_shot_with_no_detections_saves_plain_image() {
  let ws = Workspace::new();
  let mut detector = ws.detector(Vec::new());
  let image = read_image_file(&ws.path("input.png")).unwrap();
  let output = (
    ConsoleOutput::new(Vec::new()),
    (
      SaveImageFileOutput::new(ws.path("result.png"), Draw::default()),
      Some(RecordOutput::new(ws.path("records.jsonl"), 0)),
    ),
  );

  let annotations = OneShotTask
    .run_task(&image, &mut detector, &output)
    .unwrap();
  assert!(annotations.is_empty());
  assert!(output.0.into_inner().is_empty());

  let saved = image::open(ws.path("result.png")).unwrap().into_rgb8();
  assert!(saved.pixels().all(|p| *p == Rgb([10, 20, 30])));
  assert_eq!(std::fs::read_to_string(ws.path("records.jsonl")).unwrap(), "");
}

#[test]
fn one_shot_rejects_unknown_label() {
  let ws = Workspace::new();
  let mut detector = ws.detector(vec![raw(80, 0.9, 0.1, 0.1, 0.1, 0.1)]);
  let image = read_image_file(&ws.path("input.png")).unwrap();
  let output = SaveImageFileOutput::new(ws.path("result.png"), Draw::default());

  let err = OneShotTask
    .run_task(&image, &mut detector, &output)
    .unwrap_err();
  assert!(matches!(err, AppError::UnknownLabel(_)));
  assert!(!ws.path("result.png").exists());
}
