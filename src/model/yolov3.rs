// 该文件是 dpu-detect 项目的一部分。
// src/model/yolov3.rs - YOLOv3 检测头解码与非极大值抑制
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

use tracing::debug;

use crate::{
  config::YoloV3Param,
  model::{EngineError, RawBox},
};

/// 单个检测头的输出，NCHW 布局 `[1, A * (5 + C), H, W]`
#[derive(Debug, Clone, Copy)]
pub struct HeadTensor<'a> {
  pub data: &'a [f32],
  pub height: usize,
  pub width: usize,
}

/// 解码所有检测头并做按类别的非极大值抑制
///
/// 检测头按网格从大到小排序，依次取 `biases` 中的锚框；
/// 返回的检测框按置信度降序排列。
pub fn postprocess(
  heads: &[HeadTensor<'_>],
  param: &YoloV3Param,
  input_size: (u32, u32),
) -> Result<Vec<RawBox>, EngineError> {
  let anchors_per_head = 2 * param.anchor_count;
  let head_count = param.biases.len() / anchors_per_head;
  if heads.len() != head_count {
    return Err(EngineError::invalid(format!(
      "模型输出 {} 个检测头, 配置的锚框对应 {} 个检测头",
      heads.len(),
      head_count
    )));
  }

  let mut ordered = heads.to_vec();
  ordered.sort_by(|a, b| (b.width * b.height).cmp(&(a.width * a.height)));

  let mut boxes = Vec::new();
  for (head_idx, head) in ordered.iter().enumerate() {
    let anchors = &param.biases[head_idx * anchors_per_head..(head_idx + 1) * anchors_per_head];
    decode_head(head, anchors, param, input_size, &mut boxes)?;
  }
  debug!("解码得到 {} 个候选框", boxes.len());

  let kept = nms(boxes, param.nms_threshold);
  debug!("NMS 后保留 {} 个检测框", kept.len());
  Ok(kept)
}

fn decode_head(
  head: &HeadTensor<'_>,
  anchors: &[f32],
  param: &YoloV3Param,
  (input_w, input_h): (u32, u32),
  boxes: &mut Vec<RawBox>,
) -> Result<(), EngineError> {
  let stride = 5 + param.num_classes;
  let spatial = head.height * head.width;
  let expected = param.anchor_count * stride * spatial;
  if head.data.len() != expected {
    return Err(EngineError::invalid(format!(
      "检测头 {}x{} 输出大小 {}, 期望 {}",
      head.width,
      head.height,
      head.data.len(),
      expected
    )));
  }

  for a in 0..param.anchor_count {
    let (anchor_w, anchor_h) = (anchors[2 * a], anchors[2 * a + 1]);
    let base = a * stride;
    for gy in 0..head.height {
      for gx in 0..head.width {
        let idx = gy * head.width + gx;
        let at = |c: usize| head.data[(base + c) * spatial + idx];

        // 类别得分不会超过目标置信度
        let objectness = sigmoid(at(4));
        if objectness < param.conf_threshold {
          continue;
        }

        let cx = (gx as f32 + sigmoid(at(0))) / head.width as f32;
        let cy = (gy as f32 + sigmoid(at(1))) / head.height as f32;
        let w = at(2).exp() * anchor_w / input_w as f32;
        let h = at(3).exp() * anchor_h / input_h as f32;

        for class in 0..param.num_classes {
          let score = objectness * sigmoid(at(5 + class));
          if score < param.conf_threshold {
            continue;
          }
          boxes.push(RawBox {
            label: class as u32,
            score,
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            width: w,
            height: h,
          });
        }
      }
    }
  }
  Ok(())
}

/// 贪心 NMS，只在同类别之间抑制
pub fn nms(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
  boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
  let mut kept: Vec<RawBox> = Vec::with_capacity(boxes.len());
  for candidate in boxes {
    let suppressed = kept
      .iter()
      .any(|k| k.label == candidate.label && k.iou(&candidate) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn param(num_classes: usize, biases: Vec<f32>) -> YoloV3Param {
    YoloV3Param {
      num_classes,
      anchor_count: 1,
      conf_threshold: 0.6,
      nms_threshold: 0.45,
      biases,
    }
  }

  fn raw(label: u32, score: f32, x: f32) -> RawBox {
    RawBox {
      label,
      score,
      x,
      y: 0.0,
      width: 0.2,
      height: 0.2,
    }
  }

  /// 1 个锚框、2 个类别、2x2 网格；只有 (1, 1) 单元格响应强烈
  fn single_hit_head() -> Vec<f32> {
    let (stride, spatial) = (5 + 2, 4);
    let mut data = vec![0.0; stride * spatial];
    let cell = 3;
    data[4 * spatial + cell] = 10.0;
    data[6 * spatial + cell] = 10.0;
    data
  }

  #[test]
  fn decodes_single_strong_cell() {
    let data = single_hit_head();
    let heads = [HeadTensor {
      data: &data,
      height: 2,
      width: 2,
    }];
    let boxes = postprocess(&heads, &param(2, vec![32.0, 32.0]), (64, 64)).unwrap();

    assert_eq!(boxes.len(), 1);
    let b = boxes[0];
    assert_eq!(b.label, 1);
    assert!(b.score > 0.99);
    assert!((b.x - 0.5).abs() < 1e-5);
    assert!((b.y - 0.5).abs() < 1e-5);
    assert!((b.width - 0.5).abs() < 1e-5);
    assert!((b.height - 0.5).abs() < 1e-5);
  }

  #[test]
  fn larger_grid_takes_first_anchors() {
    let small = single_hit_head();
    let large = vec![-10.0; 7 * 16];
    // 大网格在后给出，但仍应使用第一组锚框
    let heads = [
      HeadTensor {
        data: &small,
        height: 2,
        width: 2,
      },
      HeadTensor {
        data: &large,
        height: 4,
        width: 4,
      },
    ];
    let boxes = postprocess(&heads, &param(2, vec![8.0, 8.0, 32.0, 32.0]), (64, 64)).unwrap();

    assert_eq!(boxes.len(), 1);
    assert!((boxes[0].width - 0.5).abs() < 1e-5);
  }

  #[test]
  fn rejects_head_count_mismatch() {
    let data = single_hit_head();
    let heads = [HeadTensor {
      data: &data,
      height: 2,
      width: 2,
    }];
    let result = postprocess(&heads, &param(2, vec![8.0, 8.0, 32.0, 32.0]), (64, 64));
    assert!(matches!(result, Err(EngineError::ModelInvalid(_))));
  }

  #[test]
  fn rejects_wrong_tensor_size() {
    let data = vec![0.0; 10];
    let heads = [HeadTensor {
      data: &data,
      height: 2,
      width: 2,
    }];
    let result = postprocess(&heads, &param(2, vec![32.0, 32.0]), (64, 64));
    assert!(matches!(result, Err(EngineError::ModelInvalid(_))));
  }

  #[test]
  fn empty_output_yields_no_boxes() {
    let data = vec![-10.0; 7 * 4];
    let heads = [HeadTensor {
      data: &data,
      height: 2,
      width: 2,
    }];
    let boxes = postprocess(&heads, &param(2, vec![32.0, 32.0]), (64, 64)).unwrap();
    assert!(boxes.is_empty());
  }

  #[test]
  fn nms_suppresses_same_class_overlap() {
    let kept = nms(vec![raw(0, 0.7, 0.01), raw(0, 0.9, 0.0)], 0.45);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].score, 0.9);
  }

  #[test]
  fn nms_keeps_different_class_overlap() {
    let kept = nms(vec![raw(0, 0.9, 0.0), raw(1, 0.8, 0.0)], 0.45);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn nms_keeps_distant_boxes_in_score_order() {
    let kept = nms(vec![raw(0, 0.6, 0.0), raw(0, 0.8, 0.5)], 0.45);
    let scores: Vec<f32> = kept.iter().map(|b| b.score).collect();
    assert_eq!(scores, vec![0.8, 0.6]);
  }
}
