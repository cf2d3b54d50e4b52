// 该文件是 dpu-detect 项目的一部分。
// src/output.rs - 输出定义
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

use std::{cell::RefCell, io::Write};

use thiserror::Error;

use crate::output::draw::{Annotation, FontError};

pub trait Render<Frame, Output: ?Sized> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

mod record;
pub use self::record::{RecordOutput, RecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("记录输出错误: {0}")]
  RecordOutputError(#[from] RecordOutputError),
  #[error("终端输出错误: {0}")]
  ConsoleError(#[from] std::io::Error),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
}

/// 每个检测结果输出一行 `<label> <score> <xmin> <xmax> <ymin> <ymax>`
pub struct ConsoleOutput<W> {
  sink: RefCell<W>,
}

impl ConsoleOutput<std::io::Stdout> {
  pub fn stdout() -> Self {
    Self::new(std::io::stdout())
  }
}

impl<W: Write> ConsoleOutput<W> {
  pub fn new(sink: W) -> Self {
    ConsoleOutput {
      sink: RefCell::new(sink),
    }
  }

  pub fn into_inner(self) -> W {
    self.sink.into_inner()
  }
}

impl<F, W: Write> Render<F, [Annotation]> for ConsoleOutput<W> {
  type Error = std::io::Error;

  fn render_result(&self, _frame: &F, result: &[Annotation]) -> Result<(), Self::Error> {
    let mut sink = self.sink.borrow_mut();
    for annotation in result {
      writeln!(sink, "{}", annotation.console_line())?;
    }
    sink.flush()
  }
}

impl<F, T: ?Sized, A, B> Render<F, T> for (A, B)
where
  A: Render<F, T>,
  B: Render<F, T>,
  OutputError: From<A::Error> + From<B::Error>,
{
  type Error = OutputError;

  fn render_result(&self, frame: &F, result: &T) -> Result<(), Self::Error> {
    self.0.render_result(frame, result)?;
    self.1.render_result(frame, result)?;
    Ok(())
  }
}

impl<F, T: ?Sized, R> Render<F, T> for Option<R>
where
  R: Render<F, T>,
{
  type Error = R::Error;

  fn render_result(&self, frame: &F, result: &T) -> Result<(), Self::Error> {
    match self {
      Some(output) => output.render_result(frame, result),
      None => Ok(()),
    }
  }
}
