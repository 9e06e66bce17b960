//! 直线、线段法向量与线段弧长的维护。
//!
//! 两个端点确定一个大圆，但端点平行或对径时平面不唯一，此时沿用上一帧的法向量；
//! 线段弧长在 (0, 2π) 内，端点本身无法区分“短弧”与“长弧”，因此需要记住上一帧的状态。

use std::f64::consts::{PI, TAU};

use crate::geometry::Vector3;
use crate::settings::GeometrySettings;

/// 端点夹角超过该值（弧度）时才检查是否近似对径。
const POSSIBLY_ANTIPODAL_ANGLE: f64 = 2.0;

/// 计算经过 `start`、`end` 的大圆法向量。
///
/// 端点平行时把 `previous` 投影到与 `start` 垂直的平面；`previous` 也不可用时
/// 任取一条与 `start` 垂直的方向。
pub fn normal_through(start: Vector3, end: Vector3, previous: Vector3) -> Vector3 {
    let candidate = start.cross(end);
    if !candidate.is_zero() {
        return candidate.normalize_or_zero();
    }
    if !previous.is_zero() {
        let projected = start.cross(previous).cross(start);
        if !projected.is_zero() {
            return projected.normalize_or_zero();
        }
    }
    arbitrary_perpendicular(start)
}

fn arbitrary_perpendicular(vector: Vector3) -> Vector3 {
    let first = vector.cross(Vector3::new(1.0, 0.0, 0.0));
    if !first.is_zero() {
        return first.normalize_or_zero();
    }
    // 与 x 轴、y 轴同时平行的非零向量不存在
    vector.cross(Vector3::new(0.0, 1.0, 0.0)).normalize_or_zero()
}

/// 线段的平面与长度状态，跨帧保存。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentArc {
    pub normal: Vector3,
    pub arc_length: f64,
    pub nearly_antipodal: bool,
}

impl SegmentArc {
    #[inline]
    pub fn new(normal: Vector3, arc_length: f64) -> Self {
        Self {
            normal,
            arc_length,
            nearly_antipodal: false,
        }
    }

    #[inline]
    pub fn is_longer_than_pi(&self) -> bool {
        self.arc_length > PI
    }

    /// 根据端点的新位置推进到下一帧状态。
    pub fn advance(self, start: Vector3, end: Vector3, settings: &GeometrySettings) -> SegmentArc {
        let normal = normal_through(start, end, self.normal);
        let mut longer_than_pi = self.is_longer_than_pi();
        let mut nearly_antipodal = self.nearly_antipodal;
        let angle = start.angle_to(end);

        if angle > POSSIBLY_ANTIPODAL_ANGLE {
            let pixel_gap = (-start).angle_to(end) * settings.boundary_radius;
            if pixel_gap < settings.nearly_antipodal_pixel {
                nearly_antipodal = true;
            } else {
                // 端点刚离开近似对径区：穿过对径点意味着长短弧互换
                if nearly_antipodal {
                    longer_than_pi = !longer_than_pi;
                }
                nearly_antipodal = false;
            }
        }

        let arc_length = if longer_than_pi { TAU - angle } else { angle };
        SegmentArc {
            normal,
            arc_length,
            nearly_antipodal,
        }
    }
}
