// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use super::geometry::BBox;

/// 贪心 NMS（不区分类别）
///
/// `keep` 按置信度降序写入保留的下标，`order` 为排序用的临时缓冲区。
pub fn suppress(
  boxes: &[BBox],
  scores: impl Fn(usize) -> f32,
  threshold: f32,
  order: &mut Vec<usize>,
  keep: &mut Vec<usize>,
) {
  order.clear();
  keep.clear();
  order.extend(0..boxes.len());
  // 稳定排序，分数相同时保持原始顺序
  order.sort_by(|&a, &b| scores(b).total_cmp(&scores(a)));

  for &i in order.iter() {
    let suppressed = keep
      .iter()
      .any(|&k| boxes[k].iou(&boxes[i]) >= threshold);
    if !suppressed {
      keep.push(i);
    }
  }

  debug!("NMS: {} 个候选保留 {} 个", boxes.len(), keep.len());
}

#[cfg(test)]
mod tests {
  use super::*;

  fn run(boxes: &[BBox], scores: &[f32], threshold: f32) -> Vec<usize> {
    let (mut order, mut keep) = (Vec::new(), Vec::new());
    suppress(boxes, |i| scores[i], threshold, &mut order, &mut keep);
    keep
  }

  #[test]
  fn keeps_highest_of_overlapping_pair() {
    let boxes = [
      BBox::new(0.0, 0.0, 10.0, 10.0),
      BBox::new(1.0, 1.0, 11.0, 11.0),
      BBox::new(50.0, 50.0, 60.0, 60.0),
    ];
    let keep = run(&boxes, &[0.6, 0.9, 0.3], 0.5);
    assert_eq!(keep, vec![1, 2]);
  }

  #[test]
  fn suppression_is_idempotent() {
    let boxes: Vec<BBox> = (0..20)
      .map(|i| {
        let x = (i * 7 % 40) as f32;
        let y = (i * 3 % 25) as f32;
        BBox::new(x, y, x + 12.0, y + 9.0)
      })
      .collect();
    let scores: Vec<f32> = (0..20).map(|i| ((i * 37) % 100) as f32 / 100.0).collect();
    let threshold = 0.4;

    let first = run(&boxes, &scores, threshold);
    for (n, &a) in first.iter().enumerate() {
      for &b in &first[n + 1..] {
        assert!(boxes[a].iou(&boxes[b]) < threshold);
      }
    }

    let kept_boxes: Vec<BBox> = first.iter().map(|&i| boxes[i]).collect();
    let kept_scores: Vec<f32> = first.iter().map(|&i| scores[i]).collect();
    let second = run(&kept_boxes, &kept_scores, threshold);
    assert_eq!(second, (0..first.len()).collect::<Vec<_>>());
  }

  #[test]
  fn nan_scores_do_not_panic() {
    let boxes = [BBox::new(0.0, 0.0, 1.0, 1.0), BBox::new(5.0, 5.0, 6.0, 6.0)];
    let keep = run(&boxes, &[f32::NAN, 0.5], 0.5);
    assert_eq!(keep.len(), 2);
  }
}
