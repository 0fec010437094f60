// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/scratch.rs - 检测器的复用缓冲区
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

use ndarray::{Array4, ArrayD};

use super::geometry::{BBox, RotatedRect};

/// 解码阶段产生的候选框
///
/// `rect` 在 extract 阶段位于网络输入空间，几何校正后位于原图空间，
/// 同时写入裁剪后的 `bounds`。
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub rect: RotatedRect,
  pub score: f32,
  pub class_id: Option<usize>,
  pub text: Option<String>,
  pub bounds: BBox,
}

impl Candidate {
  pub fn new(rect: RotatedRect, score: f32) -> Self {
    Self {
      rect,
      score,
      class_id: None,
      text: None,
      bounds: BBox::default(),
    }
  }

  pub fn with_class(mut self, class_id: usize) -> Self {
    self.class_id = Some(class_id);
    self
  }

  pub fn with_text(mut self, text: String) -> Self {
    self.text = Some(text);
    self
  }
}

/// 单个检测器独占的缓冲区，`reset` 只截断不释放
#[derive(Debug)]
pub struct Scratch {
  pub blob: Array4<f32>,
  pub outputs: Vec<ArrayD<f32>>,
  pub candidates: Vec<Candidate>,
  pub order: Vec<usize>,
  pub keep: Vec<usize>,
}

impl Default for Scratch {
  fn default() -> Self {
    Self {
      blob: Array4::zeros((1, 3, 0, 0)),
      outputs: Vec::new(),
      candidates: Vec::new(),
      order: Vec::new(),
      keep: Vec::new(),
    }
  }
}

impl Scratch {
  pub fn reset(&mut self) {
    self.outputs.clear();
    self.candidates.clear();
    self.order.clear();
    self.keep.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::geometry::Point;

  #[test]
  fn reset_keeps_capacity() {
    let mut scratch = Scratch::default();
    for i in 0..32 {
      scratch.candidates.push(Candidate::new(
        RotatedRect::new(Point::new(i as f32, 0.0), 1.0, 1.0, 0.0),
        0.5,
      ));
    }
    scratch.order.extend(0..32);
    let capacity = scratch.candidates.capacity();

    scratch.reset();
    assert!(scratch.candidates.is_empty());
    assert!(scratch.order.is_empty());
    assert_eq!(scratch.candidates.capacity(), capacity);
  }
}
