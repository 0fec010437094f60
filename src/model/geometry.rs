// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/geometry.rs - 几何基元与空间映射
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

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 轴对齐矩形 [left, top, right, bottom]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BBox {
  pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right.min(other.right);
    let y2 = self.bottom.min(other.bottom);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// 裁剪到 `width x height` 的图像内，宽或高不为正时返回 None
  pub fn clamp_to(&self, width: f32, height: f32) -> Option<BBox> {
    let clamped = BBox {
      left: self.left.clamp(0.0, width),
      top: self.top.clamp(0.0, height),
      right: self.right.clamp(0.0, width),
      bottom: self.bottom.clamp(0.0, height),
    };
    // NaN 坐标在这里也会被丢弃
    if clamped.width() > 0.0 && clamped.height() > 0.0 {
      Some(clamped)
    } else {
      None
    }
  }
}

/// 旋转矩形，角度为度，图像坐标系下顺时针为正
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotatedRect {
  pub center: Point,
  pub width: f32,
  pub height: f32,
  pub angle: f32,
}

impl RotatedRect {
  pub const fn new(center: Point, width: f32, height: f32, angle: f32) -> Self {
    Self {
      center,
      width,
      height,
      angle,
    }
  }

  pub fn from_ltwh(left: f32, top: f32, width: f32, height: f32) -> Self {
    Self {
      center: Point::new(left + width / 2.0, top + height / 2.0),
      width,
      height,
      angle: 0.0,
    }
  }

  /// 四个角点：左上、右上、右下、左下（未旋转时）
  pub fn points(&self) -> [Point; 4] {
    let (sin_a, cos_a) = self.angle.to_radians().sin_cos();
    let w_2 = self.width / 2.0;
    let h_2 = self.height / 2.0;
    [(-w_2, -h_2), (w_2, -h_2), (w_2, h_2), (-w_2, h_2)].map(|(x, y)| {
      Point::new(
        x * cos_a - y * sin_a + self.center.x,
        x * sin_a + y * cos_a + self.center.y,
      )
    })
  }

  pub fn bounding_box(&self) -> BBox {
    if self.angle == 0.0 {
      return BBox::new(
        self.center.x - self.width / 2.0,
        self.center.y - self.height / 2.0,
        self.center.x + self.width / 2.0,
        self.center.y + self.height / 2.0,
      );
    }
    let points = self.points();
    points.iter().skip(1).fold(
      BBox::new(points[0].x, points[0].y, points[0].x, points[0].y),
      |acc, p| BBox::new(acc.left.min(p.x), acc.top.min(p.y), acc.right.max(p.x), acc.bottom.max(p.y)),
    )
  }

  /// 中心与尺寸同时缩放
  pub fn scaled(&self, factor: f32) -> Self {
    Self {
      center: Point::new(self.center.x * factor, self.center.y * factor),
      width: self.width * factor,
      height: self.height * factor,
      angle: self.angle,
    }
  }

  /// 宽始终为长边：宽小于高时交换并减去 90°
  pub fn canonical(self) -> Self {
    let rect = if self.width < self.height {
      Self {
        width: self.height,
        height: self.width,
        angle: self.angle - 90.0,
        ..self
      }
    } else {
      self
    };
    Self {
      angle: normalize_angle(rect.angle),
      ..rect
    }
  }
}

/// 角度归一化到 [-90, 90)，矩形旋转 180° 后不变
fn normalize_angle(angle: f32) -> f32 {
  let mut a = angle % 180.0;
  if a >= 90.0 {
    a -= 180.0;
  } else if a < -90.0 {
    a += 180.0;
  }
  a
}

/// 网络输入空间到原图像素空间的仿射映射：`image = net * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceMapping {
  pub scale_x: f32,
  pub scale_y: f32,
  pub offset_x: f32,
  pub offset_y: f32,
}

impl SpaceMapping {
  pub const IDENTITY: SpaceMapping = SpaceMapping {
    scale_x: 1.0,
    scale_y: 1.0,
    offset_x: 0.0,
    offset_y: 0.0,
  };

  pub const fn new(scale_x: f32, scale_y: f32, offset_x: f32, offset_y: f32) -> Self {
    Self {
      scale_x,
      scale_y,
      offset_x,
      offset_y,
    }
  }

  pub fn map_point(&self, p: Point) -> Point {
    Point::new(
      p.x * self.scale_x + self.offset_x,
      p.y * self.scale_y + self.offset_y,
    )
  }

  /// 映射旋转矩形；非等比缩放时按两条边向量分别缩放
  pub fn map_rect(&self, rect: &RotatedRect) -> RotatedRect {
    let center = self.map_point(rect.center);
    if rect.angle == 0.0 {
      return RotatedRect::new(
        center,
        rect.width * self.scale_x,
        rect.height * self.scale_y,
        0.0,
      );
    }

    let (sin_a, cos_a) = rect.angle.to_radians().sin_cos();
    let (wx, wy) = (cos_a * self.scale_x, sin_a * self.scale_y);
    let (hx, hy) = (-sin_a * self.scale_x, cos_a * self.scale_y);
    RotatedRect::new(
      center,
      rect.width * wx.hypot(wy),
      rect.height * hx.hypot(hy),
      wy.atan2(wx).to_degrees(),
    )
  }
}

/// 旋转卡壳求最小面积外接矩形
pub fn min_area_rect(points: &[Point]) -> RotatedRect {
  match points {
    [] => RotatedRect::default(),
    [p] => RotatedRect::new(*p, 0.0, 0.0, 0.0),
    [a, b] => {
      let (dx, dy) = (b.x - a.x, b.y - a.y);
      RotatedRect::new(
        Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0),
        dx.hypot(dy),
        0.0,
        dy.atan2(dx).to_degrees(),
      )
    }
    _ => {
      let hull = convex_hull(points);
      if hull.len() < 3 {
        // 共线点退化为轴对齐外接框
        let bbox = points.iter().fold(
          BBox::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN),
          |acc, p| BBox::new(acc.left.min(p.x), acc.top.min(p.y), acc.right.max(p.x), acc.bottom.max(p.y)),
        );
        return RotatedRect::from_ltwh(bbox.left, bbox.top, bbox.width(), bbox.height());
      }
      rotating_calipers(&hull)
    }
  }
}

/// Andrew 单调链凸包
fn convex_hull(points: &[Point]) -> Vec<Point> {
  let mut pts = points.to_vec();
  pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
  pts.dedup();

  let mut lower: Vec<Point> = Vec::with_capacity(pts.len());
  for p in &pts {
    while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], *p) <= 0.0 {
      lower.pop();
    }
    lower.push(*p);
  }

  let mut upper: Vec<Point> = Vec::with_capacity(pts.len());
  for p in pts.iter().rev() {
    while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], *p) <= 0.0 {
      upper.pop();
    }
    upper.push(*p);
  }

  lower.pop();
  upper.pop();
  lower.extend(upper);
  lower
}

fn cross(o: Point, a: Point, b: Point) -> f32 {
  (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn rotating_calipers(hull: &[Point]) -> RotatedRect {
  let n = hull.len();
  let mut min_area = f32::MAX;
  let mut best = RotatedRect::default();

  for i in 0..n {
    let p1 = hull[i];
    let p2 = hull[(i + 1) % n];
    let (edge_x, edge_y) = (p2.x - p1.x, p2.y - p1.y);
    let edge_len = edge_x.hypot(edge_y);
    if edge_len < f32::EPSILON {
      continue;
    }

    let (ux, uy) = (edge_x / edge_len, edge_y / edge_len);
    let (vx, vy) = (-uy, ux);

    let (mut min_u, mut max_u) = (f32::MAX, f32::MIN);
    let (mut min_v, mut max_v) = (f32::MAX, f32::MIN);
    for p in hull {
      let (dx, dy) = (p.x - p1.x, p.y - p1.y);
      let u = dx * ux + dy * uy;
      let v = dx * vx + dy * vy;
      min_u = min_u.min(u);
      max_u = max_u.max(u);
      min_v = min_v.min(v);
      max_v = max_v.max(v);
    }

    let (width, height) = (max_u - min_u, max_v - min_v);
    let area = width * height;
    if area < min_area {
      min_area = area;
      let cu = (min_u + max_u) / 2.0;
      let cv = (min_v + max_v) / 2.0;
      best = RotatedRect::new(
        Point::new(p1.x + cu * ux + cv * vx, p1.y + cu * uy + cv * vy),
        width,
        height,
        uy.atan2(ux).to_degrees(),
      );
    }
  }

  best
}

#[cfg(test)]
mod tests {
  use super::*;

  fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
  }

  #[test]
  fn letterbox_mapping_round_trip() {
    let (s, ox, oy) = (2.0, 0.0, -50.0);
    let mapping = SpaceMapping::new(s, s, ox, oy);
    let (x, y, w, h) = (10.0, 30.0, 20.0, 10.0);
    let bbox = mapping
      .map_rect(&RotatedRect::from_ltwh(x, y, w, h))
      .bounding_box();
    assert!(approx(bbox.left, x * s + ox));
    assert!(approx(bbox.top, y * s + oy));
    assert!(approx(bbox.width(), w * s));
    assert!(approx(bbox.height(), h * s));
  }

  #[test]
  fn rotated_mapping_keeps_size_under_uniform_scale() {
    let rect = RotatedRect::new(Point::new(10.0, 10.0), 8.0, 4.0, 30.0);
    let mapped = SpaceMapping::new(0.5, 0.5, 1.0, 1.0).map_rect(&rect);
    assert!(approx(mapped.width, 4.0));
    assert!(approx(mapped.height, 2.0));
    assert!(approx(mapped.angle, 30.0));
    assert!(approx(mapped.center.x, 6.0));
  }

  #[test]
  fn bounding_box_of_rotated_square() {
    let rect = RotatedRect::new(Point::new(0.0, 0.0), 2.0, 2.0, 45.0);
    let bbox = rect.bounding_box();
    let half_diag = 2.0_f32.sqrt();
    assert!(approx(bbox.left, -half_diag));
    assert!(approx(bbox.right, half_diag));
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(20.0, 20.0, 30.0, 30.0);
    let c = BBox::new(5.0, 0.0, 15.0, 10.0);
    assert!(approx(a.iou(&a), 1.0));
    assert_eq!(a.iou(&b), 0.0);
    assert!(approx(a.iou(&c), 50.0 / 150.0));
  }

  #[test]
  fn clamp_drops_degenerate_boxes() {
    let inside = BBox::new(-5.0, 2.0, 12.0, 8.0).clamp_to(10.0, 10.0).unwrap();
    assert_eq!(inside, BBox::new(0.0, 2.0, 10.0, 8.0));
    assert!(BBox::new(12.0, 0.0, 20.0, 5.0).clamp_to(10.0, 10.0).is_none());
    assert!(BBox::new(1.0, 1.0, 1.0, 5.0).clamp_to(10.0, 10.0).is_none());
  }

  #[test]
  fn min_area_rect_of_axis_aligned_points() {
    let points: Vec<Point> = (0..=10)
      .flat_map(|x| [Point::new(x as f32, 0.0), Point::new(x as f32, 4.0)])
      .collect();
    let rect = min_area_rect(&points).canonical();
    assert!(approx(rect.width, 10.0));
    assert!(approx(rect.height, 4.0));
    assert!(approx(rect.center.x, 5.0));
    assert!(approx(rect.center.y, 2.0));
    let angle = rect.angle.rem_euclid(180.0);
    assert!(angle < 1e-3 || angle > 180.0 - 1e-3);
  }

  #[test]
  fn min_area_rect_recovers_rotation() {
    let source = RotatedRect::new(Point::new(50.0, 40.0), 30.0, 10.0, 20.0);
    let rect = min_area_rect(&source.points()).canonical();
    assert!(approx(rect.width, 30.0));
    assert!(approx(rect.height, 10.0));
    assert!(approx(rect.angle, 20.0));
  }

  #[test]
  fn canonical_swaps_tall_rectangles() {
    let rect = RotatedRect::new(Point::new(0.0, 0.0), 4.0, 10.0, 0.0).canonical();
    assert_eq!(rect.width, 10.0);
    assert_eq!(rect.height, 4.0);
    assert_eq!(rect.angle, -90.0);
  }
}
