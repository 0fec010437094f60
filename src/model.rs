// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use self::geometry::RotatedRect;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 单个检测结果，坐标位于原图像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
  /// 旋转角度（度），轴对齐模型恒为 0
  pub angle: f32,
  /// 置信度，位于 [0, 1]
  pub score: f32,
  pub class_id: Option<usize>,
  /// 类别名或识别出的文本
  pub text: Option<String>,
  /// 原图空间中的旋转矩形
  pub rotated: RotatedRect,
}

impl DetectItem {
  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn bbox(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

pub mod geometry;
pub mod nms;
pub mod runner;

mod craft;
mod crop;
mod detector;
mod east;
mod reader;
mod scratch;
mod sequence;
mod yolov8;

pub use self::craft::{CRAFT_MIN_AREA, CRAFT_OUTPUT_SCALE};
pub use self::crop::crop_rotated;
pub use self::detector::{Detector, DetectorBuilder, DetectorError, ExtractStatus, Variant};
pub use self::east::EAST_STRIDE;
pub use self::reader::{TextReader, TextReaderError};
pub use self::scratch::{Candidate, Scratch};
pub use self::sequence::DEFAULT_PARSEQ_CHARSET;
