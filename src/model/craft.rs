// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/craft.rs - CRAFT 文本检测解码
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

//! CRAFT 输出文本与连接两张热力图，分辨率为网络输入的一半。
//! 解码流程：阈值化、四连通标记、逐连通域膨胀、提取外轮廓、拟合最小外接矩形。

use image::{GrayImage, Luma};
use imageproc::{
  contours::{BorderType, find_contours},
  morphology::{Mask, grayscale_dilate},
  region_labelling::{Connectivity, connected_components},
};
use ndarray::{ArrayD, ArrayView2, Axis, Ix4};
use tracing::{debug, error};

use super::{
  detector::ExtractStatus,
  geometry::{Point, min_area_rect},
  scratch::Candidate,
};
use crate::config::CraftThresholds;

/// 连通域最小像素数
pub const CRAFT_MIN_AREA: u32 = 10;
/// 热力图相对网络输入的缩放倍数，与模型结构绑定
///
/// 外接矩形在膨胀之后测量，因此边长为 `L` 的方块区域输出边长为
/// `2 * (L + niter - 1)`，比 `2L` 大出膨胀带来的部分。
pub const CRAFT_OUTPUT_SCALE: f32 = 2.0;

const CRAFT_CHANNELS: usize = 2;
/// 结构元素边长上限，锚点需落在 u8 范围内
const MAX_KERNEL_SIZE: u32 = 511;

/// 拆分出 (text, link) 两张热力图，支持 NHWC 与 NCHW
fn split_heatmaps(tensor: &ArrayD<f32>) -> Option<(ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
  let view = tensor.view().into_dimensionality::<Ix4>().ok()?;
  if view.shape()[0] != 1 {
    error!("CRAFT 输出批大小必须为 1: {:?}", view.shape());
    return None;
  }

  let axis = if view.shape()[3] == CRAFT_CHANNELS {
    Axis(2)
  } else if view.shape()[1] == CRAFT_CHANNELS {
    Axis(0)
  } else {
    error!("CRAFT 输出通道数不匹配: {:?}", view.shape());
    return None;
  };

  let maps = view.index_axis_move(Axis(0), 0);
  Some((
    maps.clone().index_axis_move(axis, 0),
    maps.index_axis_move(axis, 1),
  ))
}

#[derive(Debug, Clone, Copy)]
struct ComponentStats {
  area: u32,
  min_x: u32,
  min_y: u32,
  max_x: u32,
  max_y: u32,
  max_score: f32,
}

impl Default for ComponentStats {
  fn default() -> Self {
    Self {
      area: 0,
      min_x: u32::MAX,
      min_y: u32::MAX,
      max_x: 0,
      max_y: 0,
      max_score: f32::NEG_INFINITY,
    }
  }
}

impl ComponentStats {
  fn add(&mut self, x: u32, y: u32, score: f32) {
    self.area += 1;
    self.min_x = self.min_x.min(x);
    self.min_y = self.min_y.min(y);
    self.max_x = self.max_x.max(x);
    self.max_y = self.max_y.max(y);
    self.max_score = self.max_score.max(score);
  }

  fn width(&self) -> u32 {
    self.max_x - self.min_x + 1
  }

  fn height(&self) -> u32 {
    self.max_y - self.min_y + 1
  }

  /// 膨胀次数，随连通域的填充程度变化
  fn dilate_iterations(&self) -> u32 {
    let (w, h) = (self.width() as f32, self.height() as f32);
    (2.0 * (self.area as f32 * w.min(h) / (w * h)).sqrt()).floor() as u32
  }
}

/// 矩形结构元素膨胀，锚点位于中心（OpenCV 约定）
fn dilate_rect(src: &GrayImage, size: u32) -> GrayImage {
  let size = size.min(MAX_KERNEL_SIZE);
  if size <= 1 {
    return src.clone();
  }
  let element = GrayImage::from_pixel(size, size, Luma([255]));
  let anchor = (size / 2) as u8;
  grayscale_dilate(src, &Mask::from_image(&element, anchor, anchor))
}

pub(crate) fn extract(
  outputs: &[ArrayD<f32>],
  thresholds: &CraftThresholds,
  candidates: &mut Vec<Candidate>,
) -> ExtractStatus {
  let Some((text, link)) = outputs.first().and_then(split_heatmaps) else {
    return ExtractStatus::ShapeMismatch;
  };

  let (rows, cols) = text.dim();
  let (width, height) = (cols as u32, rows as u32);

  let mut mask = GrayImage::new(width, height);
  let mut link_only = vec![false; rows * cols];
  for ((y, x), &text_score) in text.indexed_iter() {
    let is_text = text_score > thresholds.low_text;
    let is_link = link[[y, x]] > thresholds.link_threshold;
    if is_text || is_link {
      mask.put_pixel(x as u32, y as u32, Luma([255]));
    }
    link_only[y * cols + x] = is_link && !is_text;
  }

  let labels = connected_components(&mask, Connectivity::Four, Luma([0u8]));
  let count = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
  let mut stats = vec![ComponentStats::default(); count + 1];
  for (x, y, label) in labels.enumerate_pixels() {
    let k = label[0] as usize;
    if k != 0 {
      stats[k].add(x, y, text[[y as usize, x as usize]]);
    }
  }
  debug!("CRAFT 热力图 {}x{} 得到 {} 个连通域", width, height, count);

  for (k, component) in stats.iter().enumerate().skip(1) {
    if component.area < CRAFT_MIN_AREA || component.max_score < thresholds.text_threshold {
      continue;
    }

    let niter = component.dilate_iterations();
    let x0 = component.min_x.saturating_sub(niter);
    let y0 = component.min_y.saturating_sub(niter);
    let x1 = (component.min_x + component.width() + niter + 1).min(width);
    let y1 = (component.min_y + component.height() + niter + 1).min(height);

    let mut patch = GrayImage::new(x1 - x0, y1 - y0);
    for y in y0..y1 {
      for x in x0..x1 {
        let index = y as usize * cols + x as usize;
        if labels.get_pixel(x, y)[0] as usize == k && !link_only[index] {
          patch.put_pixel(x - x0, y - y0, Luma([255]));
        }
      }
    }
    let patch = dilate_rect(&patch, niter + 1);

    for contour in find_contours::<i32>(&patch) {
      if !matches!(contour.border_type, BorderType::Outer) || contour.parent.is_some() {
        continue;
      }
      let points: Vec<Point> = contour
        .points
        .iter()
        .map(|p| Point::new((p.x + x0 as i32) as f32, (p.y + y0 as i32) as f32))
        .collect();
      let rect = min_area_rect(&points)
        .scaled(CRAFT_OUTPUT_SCALE)
        .canonical();
      candidates.push(Candidate::new(rect, 0.0));
    }
  }

  debug!("CRAFT 解码得到 {} 个候选", candidates.len());
  ExtractStatus::Decoded(candidates.len())
}
