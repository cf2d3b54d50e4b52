// 该文件是 dpu-detect 项目的一部分。
// src/output/record.rs - 检测记录输出 (JSON Lines)
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

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::PathBuf,
};

use thiserror::Error;
use tracing::info;

use crate::output::{
  Render,
  draw::{Annotation, to_record},
};

#[derive(Error, Debug)]
pub enum RecordOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每个检测结果写一行 JSON 记录，文件每次运行覆盖
pub struct RecordOutput {
  path: PathBuf,
  frame_id: u64,
}

impl RecordOutput {
  pub fn new(path: impl Into<PathBuf>, frame_id: u64) -> Self {
    RecordOutput {
      path: path.into(),
      frame_id,
    }
  }
}

impl<F> Render<F, [Annotation]> for RecordOutput {
  type Error = RecordOutputError;

  fn render_result(&self, _frame: &F, result: &[Annotation]) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(&self.path)?);
    for annotation in result {
      serde_json::to_writer(&mut writer, &to_record(&annotation.detection, self.frame_id))?;
      writer.write_all(b"\n")?;
    }
    writer.flush()?;

    info!("写入 {} 条记录到: {}", result.len(), self.path.display());
    Ok(())
  }
}
