// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测解码
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

use ndarray::{ArrayD, ArrayView2, Axis, Ix2};
use tracing::{debug, error};

use super::{detector::ExtractStatus, geometry::RotatedRect, scratch::Candidate};

const YOLOV8_BOX_COLUMNS: usize = 4;

/// 转为 `[nBoxes, 4 + nClasses]` 视图
///
/// 原始导出为 `[1, 4 + nClasses, nBoxes]`，已知类别数时按其判断是否转置，
/// 否则假定框数多于列数。
fn rows_view(tensor: &ArrayD<f32>, num_classes: usize) -> Option<ArrayView2<'_, f32>> {
  let view = match tensor.ndim() {
    3 if tensor.shape()[0] == 1 => tensor.view().index_axis_move(Axis(0), 0),
    2 => tensor.view(),
    _ => {
      error!("YOLOv8 输出形状不支持: {:?}", tensor.shape());
      return None;
    }
  };
  let view = view.into_dimensionality::<Ix2>().ok()?;

  let (d0, d1) = view.dim();
  let columns = YOLOV8_BOX_COLUMNS + num_classes;
  let transpose = if num_classes > 0 && d0 == columns && d1 != columns {
    true
  } else if num_classes > 0 && d1 == columns {
    false
  } else {
    d0 < d1
  };
  let view = if transpose { view.reversed_axes() } else { view };

  if view.ncols() <= YOLOV8_BOX_COLUMNS {
    error!("YOLOv8 输出列数不足: {:?}", view.dim());
    return None;
  }
  debug!("YOLOv8 输出 {:?} 转置: {}", view.dim(), transpose);
  Some(view)
}

pub(crate) fn extract(
  outputs: &[ArrayD<f32>],
  threshold: f32,
  num_classes: usize,
  candidates: &mut Vec<Candidate>,
) -> ExtractStatus {
  let Some(rows) = outputs.first().and_then(|t| rows_view(t, num_classes)) else {
    return ExtractStatus::ShapeMismatch;
  };

  for row in rows.outer_iter() {
    let (class_id, score) = row
      .iter()
      .skip(YOLOV8_BOX_COLUMNS)
      .enumerate()
      .fold((0usize, f32::NEG_INFINITY), |(best, max), (c, &v)| {
        if v > max { (c, v) } else { (best, max) }
      });

    if !(score >= threshold) {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let rect = RotatedRect::from_ltwh(cx - w / 2.0, cy - h / 2.0, w, h);
    candidates.push(Candidate::new(rect, score).with_class(class_id));
  }

  debug!("YOLOv8 解码 {} 行得到 {} 个候选", rows.nrows(), candidates.len());
  ExtractStatus::Decoded(candidates.len())
}
