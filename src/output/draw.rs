// 该文件是 dpu-detect 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  detector::Detection,
  labels::{UnknownLabel, label_name},
};

const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 3;
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件 {0}: {1}")]
  Io(String, std::io::Error),
  #[error("字体文件无效: {0}")]
  Invalid(#[from] ab_glyph::InvalidFont),
}

pub fn load_font(path: &Path) -> Result<FontVec, FontError> {
  let data = std::fs::read(path).map_err(|e| FontError::Io(path.display().to_string(), e))?;
  Ok(FontVec::try_from_vec(data)?)
}

/// 裁剪到图像范围内的检测框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
}

impl ClipBox {
  pub fn is_empty(&self) -> bool {
    self.xmax < self.xmin || self.ymax < self.ymin
  }
}

pub fn clip_to_image(d: &Detection, image_width: u32, image_height: u32) -> ClipBox {
  ClipBox {
    xmin: d.x_min.max(0.0),
    ymin: d.y_min.max(0.0),
    xmax: (d.x_min + d.width).min(image_width as f32 - 1.0),
    ymax: (d.y_min + d.height).min(image_height as f32 - 1.0),
  }
}

/// 导出为扁平的键值记录，使用未裁剪的原始坐标
pub fn to_record(d: &Detection, frame_id: u64) -> BTreeMap<String, String> {
  BTreeMap::from([
    ("frame_id".to_string(), frame_id.to_string()),
    ("prob".to_string(), format!("{:.6}", d.score)),
    ("x".to_string(), format!("{:.6}", d.x_min)),
    ("y".to_string(), format!("{:.6}", d.y_min)),
    ("width".to_string(), format!("{:.6}", d.width)),
    ("height".to_string(), format!("{:.6}", d.height)),
  ])
}

/// 已解析标签名并裁剪的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub detection: Detection,
  pub label: &'static str,
  pub clip: ClipBox,
}

impl Annotation {
  pub fn new(detection: Detection, image_width: u32, image_height: u32) -> Result<Self, UnknownLabel> {
    Ok(Annotation {
      label: label_name(detection.label)?,
      clip: clip_to_image(&detection, image_width, image_height),
      detection,
    })
  }

  pub fn label_text(&self) -> String {
    format!("{} {:.2}", self.label, self.detection.score)
  }

  /// `<label> <score> <xmin> <xmax> <ymin> <ymax>`
  pub fn console_line(&self) -> String {
    format!(
      "{} {} {} {} {} {}",
      self.label,
      significant(self.detection.score),
      significant(self.clip.xmin),
      significant(self.clip.xmax),
      significant(self.clip.ymin),
      significant(self.clip.ymax)
    )
  }
}

const SIGNIFICANT_DIGITS: i32 = 6;

/// 按 `%g` 规则保留 6 位有效数字，并去掉末尾的 0
fn significant(value: f32) -> String {
  if value == 0.0 || !value.is_finite() {
    return value.to_string();
  }
  let sci = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, value);
  let Some((mantissa, exp)) = sci.split_once('e') else {
    return sci;
  };
  let exp: i32 = exp.parse().unwrap_or(0);
  if exp < -4 || exp >= SIGNIFICANT_DIGITS {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
  } else {
    let decimals = (SIGNIFICANT_DIGITS - 1 - exp) as usize;
    trim_fraction(&format!("{:.*}", decimals, value)).to_string()
  }
}

fn trim_fraction(text: &str) -> &str {
  if text.contains('.') {
    text.trim_end_matches('0').trim_end_matches('.')
  } else {
    text
  }
}

pub struct Draw {
  color: Rgb<u8>,
  thickness: u32,
  font_size: f32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      color: Rgb(BOX_COLOR),
      thickness: BOX_THICKNESS,
      font_size: LABEL_FONT_SIZE,
      font: None,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  /// 在图像上绘制固定颜色与线宽的矩形框；有字体时在框上方绘制标签
  pub fn render(&self, image: &mut RgbImage, clip: &ClipBox, label: &str) {
    if clip.is_empty() {
      return;
    }

    let x_min = clip.xmin.floor() as i32;
    let y_min = clip.ymin.floor() as i32;
    let x_max = clip.xmax.floor() as i32;
    let y_max = clip.ymax.floor() as i32;
    let width = (x_max - x_min + 1) as u32;
    let height = (y_max - y_min + 1) as u32;

    // 向内加粗
    for t in 0..self.thickness {
      if width <= 2 * t || height <= 2 * t {
        break;
      }
      let rect = Rect::at(x_min + t as i32, y_min + t as i32).of_size(width - 2 * t, height - 2 * t);
      draw_hollow_rect_mut(image, rect, self.color);
    }

    if let Some(font) = &self.font {
      self.draw_label(image, x_min, y_min, label, font);
    }
  }

  fn draw_label(&self, image: &mut RgbImage, x_min: i32, y_min: i32, label: &str, font: &FontVec) {
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, label);
    let tag_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在框上方，超出图像时贴顶
    let label_x = x_min.max(0);
    let label_y = (y_min - tag_height).max(0);
    let max_width = (image.width() as i32 - label_x).max(0) as u32;
    let tag_width = text_width.min(max_width);
    if tag_width == 0 || tag_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(tag_width, tag_height as u32);
    draw_filled_rect_mut(image, rect, self.color);
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      label,
    );
  }
}
