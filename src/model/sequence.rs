// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/sequence.rs - 序列识别贪心解码
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
use crate::config::Labels;

/// PARSeq 默认的 94 个可打印字符
pub const DEFAULT_PARSEQ_CHARSET: &str = concat!(
  "0123456789",
  "abcdefghijklmnopqrstuvwxyz",
  "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
  "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~",
);

/// 逐位置取最大类别，类别 0 为结束符
pub fn decode(logits: ArrayView2<'_, f32>, charset: &Labels) -> (String, f32) {
  let mut text = String::new();
  let mut confidence = 1.0f32;

  for position in logits.outer_iter() {
    let (index, max) = position
      .iter()
      .enumerate()
      .fold((0usize, f32::NEG_INFINITY), |(best, max), (i, &v)| {
        if v > max { (i, v) } else { (best, max) }
      });
    let denominator: f32 = position.iter().map(|&v| (v - max).exp()).sum();
    confidence *= 1.0 / denominator;

    if index == 0 {
      break;
    }
    text.push_str(&charset.label(index - 1));
  }

  (text, confidence)
}

fn logits_view(tensor: &ArrayD<f32>) -> Option<ArrayView2<'_, f32>> {
  let view = match tensor.ndim() {
    3 if tensor.shape()[0] == 1 => tensor.view().index_axis_move(Axis(0), 0),
    2 => tensor.view(),
    _ => {
      error!("序列识别输出形状不支持: {:?}", tensor.shape());
      return None;
    }
  };
  view.into_dimensionality::<Ix2>().ok()
}

pub(crate) fn extract(
  outputs: &[ArrayD<f32>],
  charset: &Labels,
  input_size: (u32, u32),
  candidates: &mut Vec<Candidate>,
) -> ExtractStatus {
  let Some(logits) = outputs.first().and_then(logits_view) else {
    return ExtractStatus::ShapeMismatch;
  };
  if logits.ncols() == 0 {
    error!("序列识别输出类别数为 0");
    return ExtractStatus::ShapeMismatch;
  }

  let (text, confidence) = decode(logits, charset);
  debug!("序列识别结果: {:?} 置信度 {:.3}", text, confidence);

  let (w, h) = input_size;
  let rect = RotatedRect::from_ltwh(0.0, 0.0, w as f32, h as f32);
  candidates.push(Candidate::new(rect, confidence).with_text(text));
  ExtractStatus::Decoded(candidates.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array2;

  fn one_hot(indices: &[usize], classes: usize, peak: f32) -> Array2<f32> {
    let mut logits = Array2::<f32>::zeros((indices.len(), classes));
    for (t, &i) in indices.iter().enumerate() {
      logits[[t, i]] = peak;
    }
    logits
  }

  #[test]
  fn default_charset_has_94_symbols() {
    assert_eq!(DEFAULT_PARSEQ_CHARSET.chars().count(), 94);
  }

  #[test]
  fn stops_at_end_of_sequence() {
    let charset = Labels::from_chars("abc");
    let logits = one_hot(&[1, 3, 2, 0, 1], 4, 10.0);
    let (text, confidence) = decode(logits.view(), &charset);
    assert_eq!(text, "acb");
    assert!(confidence > 0.99 && confidence <= 1.0);
  }

  #[test]
  fn uniform_logits_give_low_confidence() {
    let charset = Labels::from_chars("ab");
    let logits = Array2::<f32>::zeros((1, 3));
    let (text, confidence) = decode(logits.view(), &charset);
    // 并列时取第一个，即结束符
    assert_eq!(text, "");
    assert!((confidence - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn out_of_range_index_falls_back_to_number() {
    let charset = Labels::from_chars("a");
    let logits = one_hot(&[3, 0], 5, 8.0);
    let (text, _) = decode(logits.view(), &charset);
    assert_eq!(text, "2");
  }

  #[test]
  fn decoding_is_deterministic() {
    let charset = Labels::from_chars(DEFAULT_PARSEQ_CHARSET);
    let logits = Array2::from_shape_fn((8, 95), |(t, c)| ((t * 31 + c * 17) % 23) as f32 / 7.0);
    let first = decode(logits.view(), &charset);
    let second = decode(logits.view(), &charset);
    assert_eq!(first, second);
  }
}
