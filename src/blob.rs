// 该文件是 Shanan （山南西风） 项目的一部分。
// src/blob.rs - 网络输入张量构造
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

use image::{RgbImage, imageops::FilterType};
use ndarray::Array4;
use tracing::debug;

use crate::{
  config::{ModelConfig, ResizeMode},
  model::geometry::SpaceMapping,
};

/// 原图到网络输入的正向变换：`net = image * scale + offset`
///
/// 缩放系数由取整后的缩放尺寸重新计算，保证逆变换精确。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobTransform {
  pub mode: ResizeMode,
  /// 缩放后的整数尺寸
  pub resized: (u32, u32),
  pub scale_x: f32,
  pub scale_y: f32,
  /// 缩放图左上角在网络输入中的位置，中心裁剪时为负
  pub offset_x: i64,
  pub offset_y: i64,
}

impl BlobTransform {
  pub fn new(mode: ResizeMode, image: (u32, u32), input: (u32, u32)) -> Self {
    let (iw, ih) = (image.0.max(1), image.1.max(1));
    let (w, h) = input;

    let resized = match mode {
      ResizeMode::Raw => (w, h),
      ResizeMode::CenterCrop => {
        let r = (w as f64 / iw as f64).max(h as f64 / ih as f64);
        (
          ((iw as f64 * r).round() as u32).max(w),
          ((ih as f64 * r).round() as u32).max(h),
        )
      }
      ResizeMode::Letterbox => {
        let r = (w as f64 / iw as f64).min(h as f64 / ih as f64);
        (
          ((iw as f64 * r).round() as u32).clamp(1, w.max(1)),
          ((ih as f64 * r).round() as u32).clamp(1, h.max(1)),
        )
      }
    };

    let offset_x = (w as i64 - resized.0 as i64) / 2;
    let offset_y = (h as i64 - resized.1 as i64) / 2;

    Self {
      mode,
      resized,
      scale_x: resized.0 as f32 / iw as f32,
      scale_y: resized.1 as f32 / ih as f32,
      offset_x,
      offset_y,
    }
  }

  /// 网络输入空间回到原图空间的逆映射
  pub fn mapping(&self) -> SpaceMapping {
    let scale_x = 1.0 / self.scale_x;
    let scale_y = 1.0 / self.scale_y;
    SpaceMapping::new(
      scale_x,
      scale_y,
      -(self.offset_x as f32) * scale_x,
      -(self.offset_y as f32) * scale_y,
    )
  }
}

/// 将 RgbImage 转换为 `[1, 3, H, W]` 的浮点张量，缓冲区在帧间复用
#[derive(Debug, Clone)]
pub struct Blobifier {
  input_width: u32,
  input_height: u32,
  mode: ResizeMode,
  mean: [f32; 3],
  scale: [f32; 3],
  pad: [f32; 3],
  swap_rb: bool,
}

impl Blobifier {
  pub fn new(config: &ModelConfig) -> Self {
    Self {
      input_width: config.input_width,
      input_height: config.input_height,
      mode: config.resize,
      mean: config.mean,
      scale: config.scale,
      pad: config.pad,
      swap_rb: config.swap_rb,
    }
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.input_width, self.input_height)
  }

  /// 填充 blob 并返回所用的正向变换
  pub fn blobify(&self, image: &RgbImage, blob: &mut Array4<f32>) -> BlobTransform {
    let (w, h) = self.input_size();
    let transform = BlobTransform::new(self.mode, image.dimensions(), (w, h));

    let shape = [1, 3, h as usize, w as usize];
    if blob.shape() != shape {
      *blob = Array4::zeros(shape);
    }

    // 源图像为 RGB，交换后按 BGR 写入
    let channel_map: [usize; 3] = if self.swap_rb { [2, 1, 0] } else { [0, 1, 2] };

    for c in 0..3 {
      let fill = (self.pad[c] - self.mean[c]) * self.scale[c];
      blob.index_axis_mut(ndarray::Axis(1), c).fill(fill);
    }

    let resized = if transform.resized == image.dimensions() {
      None
    } else {
      Some(image::imageops::resize(
        image,
        transform.resized.0,
        transform.resized.1,
        FilterType::Triangle,
      ))
    };
    let source = resized.as_ref().unwrap_or(image);

    // 缩放图与网络输入的重叠区域
    let x_begin = transform.offset_x.max(0) as u32;
    let y_begin = transform.offset_y.max(0) as u32;
    let x_end = (transform.offset_x + transform.resized.0 as i64).min(w as i64) as u32;
    let y_end = (transform.offset_y + transform.resized.1 as i64).min(h as i64) as u32;

    for c in 0..3 {
      let src_c = channel_map[c];
      for y in y_begin..y_end {
        let sy = (y as i64 - transform.offset_y) as u32;
        for x in x_begin..x_end {
          let sx = (x as i64 - transform.offset_x) as u32;
          let value = source.get_pixel(sx, sy)[src_c] as f32;
          blob[[0, c, y as usize, x as usize]] = (value - self.mean[c]) * self.scale[c];
        }
      }
    }

    debug!(
      "构造输入张量: 原图 {:?} -> 缩放 {:?} 偏移 ({}, {}) 策略 {:?}",
      image.dimensions(),
      transform.resized,
      transform.offset_x,
      transform.offset_y,
      transform.mode
    );

    transform
  }
}
