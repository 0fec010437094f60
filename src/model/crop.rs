// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/crop.rs - 旋转区域裁剪
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

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};

use super::DetectItem;

/// 按检测结果的旋转矩形裁剪并摆正
///
/// 裁剪范围在矩形自身坐标系内与原图求交，与图像的交集过小时返回 None。
pub fn crop_rotated(image: &RgbImage, item: &DetectItem) -> Option<RgbImage> {
  let rect = item.rotated;
  if !(rect.width >= 1.0 && rect.height >= 1.0) {
    return None;
  }

  // 原图四角投影到矩形局部坐标系 (u, v)
  let (sin, cos) = rect.angle.to_radians().sin_cos();
  let (iw, ih) = (image.width() as f32, image.height() as f32);
  let (mut u_min, mut u_max) = (f32::INFINITY, f32::NEG_INFINITY);
  let (mut v_min, mut v_max) = (f32::INFINITY, f32::NEG_INFINITY);
  for (x, y) in [(0.0, 0.0), (iw, 0.0), (0.0, ih), (iw, ih)] {
    let (dx, dy) = (x - rect.center.x, y - rect.center.y);
    let (u, v) = (cos * dx + sin * dy, -sin * dx + cos * dy);
    u_min = u_min.min(u);
    u_max = u_max.max(u);
    v_min = v_min.min(v);
    v_max = v_max.max(v);
  }

  let u0 = u_min.max(-rect.width / 2.0);
  let u1 = u_max.min(rect.width / 2.0);
  let v0 = v_min.max(-rect.height / 2.0);
  let v1 = v_max.min(rect.height / 2.0);
  let width = (u1 - u0).round();
  let height = (v1 - v0).round();
  if !(width >= 1.0 && height >= 1.0) {
    return None;
  }

  // 原图 -> 裁剪图：平移到矩形中心，反向旋转，再把交集左上角移到原点
  let projection = Projection::translate(-u0, -v0)
    * Projection::rotate(-rect.angle.to_radians())
    * Projection::translate(-rect.center.x, -rect.center.y);

  let mut out = RgbImage::new(width as u32, height as u32);
  warp_into(
    image,
    &projection,
    Interpolation::Bilinear,
    Rgb([0, 0, 0]),
    &mut out,
  );
  Some(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::geometry::{Point, RotatedRect};

  fn item(rect: RotatedRect) -> DetectItem {
    let bbox = rect.bounding_box();
    DetectItem {
      left: bbox.left,
      top: bbox.top,
      right: bbox.right,
      bottom: bbox.bottom,
      angle: rect.angle,
      score: 1.0,
      class_id: None,
      text: None,
      rotated: rect,
    }
  }

  #[test]
  fn axis_aligned_crop_copies_region() {
    let mut image = RgbImage::new(40, 30);
    for y in 10..20 {
      for x in 5..25 {
        image.put_pixel(x, y, Rgb([200, 100, 50]));
      }
    }
    let crop = crop_rotated(&image, &item(RotatedRect::from_ltwh(5.0, 10.0, 20.0, 10.0))).unwrap();
    assert_eq!(crop.dimensions(), (20, 10));
    assert_eq!(crop.get_pixel(10, 5), &Rgb([200, 100, 50]));
  }

  #[test]
  fn crop_is_limited_to_the_image() {
    let mut image = RgbImage::new(40, 30);
    image.put_pixel(0, 0, Rgb([9, 9, 9]));

    let huge = RotatedRect::new(Point::new(20.0, 15.0), 5e9, 5e9, 0.0);
    let crop = crop_rotated(&image, &item(huge)).unwrap();
    assert_eq!(crop.dimensions(), (40, 30));

    let partial = RotatedRect::from_ltwh(-10.0, 0.0, 30.0, 10.0);
    let crop = crop_rotated(&image, &item(partial)).unwrap();
    assert_eq!(crop.dimensions(), (20, 10));
    assert_eq!(crop.get_pixel(0, 0), &Rgb([9, 9, 9]));

    let outside = RotatedRect::from_ltwh(100.0, 100.0, 10.0, 10.0);
    assert!(crop_rotated(&image, &item(outside)).is_none());
  }

  #[test]
  fn degenerate_rect_is_skipped() {
    let image = RgbImage::new(10, 10);
    let rect = RotatedRect::new(Point::new(5.0, 5.0), 0.2, 4.0, 0.0);
    assert!(crop_rotated(&image, &item(rect)).is_none());
  }
}
