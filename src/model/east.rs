// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/east.rs - EAST 文本检测解码
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

use ndarray::{ArrayD, ArrayView3, Axis, Ix4};
use tracing::{debug, error};

use super::{
  detector::ExtractStatus,
  geometry::{Point, RotatedRect},
  scratch::Candidate,
};

/// 每个网格对应 4x4 个输入像素
pub const EAST_STRIDE: f32 = 4.0;

const EAST_SCORE_CHANNELS: usize = 1;
const EAST_GEOMETRY_CHANNELS: usize = 5;

/// 根据通道数匹配分数图和几何图，返回 (score, geometry)
fn match_score_geometry<'a>(
  tensor1: &'a ArrayD<f32>,
  tensor2: &'a ArrayD<f32>,
) -> Option<(ArrayView3<'a, f32>, ArrayView3<'a, f32>)> {
  let view1 = tensor1.view().into_dimensionality::<Ix4>().ok()?;
  let view2 = tensor2.view().into_dimensionality::<Ix4>().ok()?;

  if view1.shape()[0] != 1 || view2.shape()[0] != 1 {
    error!(
      "EAST 输出批大小必须为 1: {:?} / {:?}",
      view1.shape(),
      view2.shape()
    );
    return None;
  }
  if view1.shape()[2..] != view2.shape()[2..] {
    error!(
      "EAST 输出空间尺寸不一致: {:?} / {:?}",
      view1.shape(),
      view2.shape()
    );
    return None;
  }

  let (c1, c2) = (view1.shape()[1], view2.shape()[1]);
  let (score, geometry) = if c1 == EAST_SCORE_CHANNELS && c2 == EAST_GEOMETRY_CHANNELS {
    debug!("EAST 输出顺序正常 - 索引 0 是分数，索引 1 是几何");
    (view1, view2)
  } else if c1 == EAST_GEOMETRY_CHANNELS && c2 == EAST_SCORE_CHANNELS {
    debug!("EAST 输出顺序交换 - 索引 0 是几何，索引 1 是分数");
    (view2, view1)
  } else {
    error!("EAST 输出通道数不匹配: {} / {}", c1, c2);
    return None;
  };

  Some((
    score.index_axis_move(Axis(0), 0),
    geometry.index_axis_move(Axis(0), 0),
  ))
}

/// 由四条边距与角度恢复旋转矩形
fn decode_cell(x: usize, y: usize, d: [f32; 4], angle: f32) -> RotatedRect {
  let (sin_a, cos_a) = angle.sin_cos();
  let (ox, oy) = (x as f32 * EAST_STRIDE, y as f32 * EAST_STRIDE);
  let h = d[0] + d[2];
  let w = d[1] + d[3];

  let anchor = Point::new(
    ox + cos_a * d[1] + sin_a * d[2],
    oy - sin_a * d[1] + cos_a * d[2],
  );
  let p1 = Point::new(anchor.x - sin_a * h, anchor.y - cos_a * h);
  let p3 = Point::new(anchor.x - cos_a * w, anchor.y + sin_a * w);

  RotatedRect::new(
    Point::new((p1.x + p3.x) / 2.0, (p1.y + p3.y) / 2.0),
    w,
    h,
    -angle.to_degrees(),
  )
}

pub(crate) fn extract(
  outputs: &[ArrayD<f32>],
  threshold: f32,
  candidates: &mut Vec<Candidate>,
) -> ExtractStatus {
  let [tensor1, tensor2, ..] = outputs else {
    error!("EAST 需要两个输出，实际为 {}", outputs.len());
    return ExtractStatus::ShapeMismatch;
  };
  let Some((score, geometry)) = match_score_geometry(tensor1, tensor2) else {
    return ExtractStatus::ShapeMismatch;
  };

  let (rows, cols) = (score.shape()[1], score.shape()[2]);
  for y in 0..rows {
    for x in 0..cols {
      let confidence = score[[0, y, x]];
      // NaN 不满足比较，自然被跳过
      if !(confidence >= threshold) {
        continue;
      }
      let d = [
        geometry[[0, y, x]],
        geometry[[1, y, x]],
        geometry[[2, y, x]],
        geometry[[3, y, x]],
      ];
      let rect = decode_cell(x, y, d, geometry[[4, y, x]]);
      candidates.push(Candidate::new(rect, confidence));
    }
  }

  debug!("EAST 解码 {}x{} 网格得到 {} 个候选", cols, rows, candidates.len());
  ExtractStatus::Decoded(candidates.len())
}
