//! 球面几何核心
//!
//! 提供单位球面上的向量运算、几何设置、样式描述以及一维对象（直线、线段、圆）
//! 的求交算法库。
//!
//! # 示例
//!
//! ```rust
//! use sphere_core::geometry::Vector3;
//! use sphere_core::intersection::{LineShape, intersect_line_with_line};
//!
//! let equator = LineShape::new(Vector3::new(0.0, 0.0, 1.0));
//! let meridian = LineShape::new(Vector3::new(1.0, 0.0, 0.0));
//! let [first, second] = intersect_line_with_line(&equator, &meridian);
//! assert!(first.exists && second.exists);
//! assert!((first.vector.y() - 1.0).abs() < 1e-12);
//! ```

pub mod arc;
pub mod intersection;
pub mod style;

pub mod geometry {
    use std::f64::consts::FRAC_PI_2;
    use std::fmt;
    use std::ops::{Add, Mul, Neg, Sub};

    use glam::{DQuat, DVec2, DVec3};
    use serde::{Deserialize, Serialize};

    /// 判定零向量、重合向量时使用的绝对容差。
    pub const TOLERANCE: f64 = 1e-7;

    /// 三维向量，位置向量约定位于单位球面上。内部以 `glam::DVec3` 表示。
    #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
    pub struct Vector3(pub DVec3);

    impl Vector3 {
        pub const ZERO: Self = Self(DVec3::ZERO);

        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn normalize(self) -> Option<Self> {
            let len = self.0.length();
            if len <= f64::EPSILON {
                None
            } else {
                Some(Self(self.0 / len))
            }
        }

        /// 归一化；零向量保持为零向量，避免产生 NaN。
        #[inline]
        pub fn normalize_or_zero(self) -> Self {
            self.normalize().unwrap_or(Self::ZERO)
        }

        #[inline]
        pub fn dot(self, other: Vector3) -> f64 {
            self.0.dot(other.0)
        }

        #[inline]
        pub fn cross(self, other: Vector3) -> Vector3 {
            Self(self.0.cross(other.0))
        }

        #[inline]
        pub fn is_zero(self) -> bool {
            self.0.length_squared() < TOLERANCE * TOLERANCE
        }

        /// 两向量在容差内是否重合。
        #[inline]
        pub fn near(self, other: Vector3) -> bool {
            (self - other).is_zero()
        }

        /// 两向量夹角（弧度），即单位球面上的大圆距离。任一向量为零时返回 π/2。
        pub fn angle_to(self, other: Vector3) -> f64 {
            let denominator = (self.length_squared() * other.length_squared()).sqrt();
            if denominator == 0.0 {
                return FRAC_PI_2;
            }
            (self.dot(other) / denominator).clamp(-1.0, 1.0).acos()
        }

        /// 绕 `axis` 按右手法则旋转 `angle` 弧度。
        pub fn rotate_about(self, axis: Vector3, angle: f64) -> Vector3 {
            match axis.normalize() {
                Some(axis) => Self(DQuat::from_axis_angle(axis.0, angle) * self.0),
                None => self,
            }
        }

        /// 以固定九位小数输出 `(x,y,z)`，用于命令序列化。
        pub fn to_fixed(self) -> String {
            format!("({:.9},{:.9},{:.9})", self.0.x, self.0.y, self.0.z)
        }

        /// 解析 [`Vector3::to_fixed`] 的输出，括号可省略。
        pub fn parse_fixed(text: &str) -> Option<Self> {
            let trimmed = text.trim();
            let inner = trimmed
                .strip_prefix('(')
                .and_then(|rest| rest.strip_suffix(')'))
                .unwrap_or(trimmed);
            let mut parts = inner.split(',').map(|part| part.trim().parse::<f64>());
            let x = parts.next()?.ok()?;
            let y = parts.next()?.ok()?;
            let z = parts.next()?.ok()?;
            if parts.next().is_some() || !(x.is_finite() && y.is_finite() && z.is_finite()) {
                return None;
            }
            Some(Self::new(x, y, z))
        }
    }

    impl From<DVec3> for Vector3 {
        fn from(value: DVec3) -> Self {
            Self(value)
        }
    }

    impl Add for Vector3 {
        type Output = Vector3;

        fn add(self, rhs: Vector3) -> Vector3 {
            Self(self.0 + rhs.0)
        }
    }

    impl Sub for Vector3 {
        type Output = Vector3;

        fn sub(self, rhs: Vector3) -> Vector3 {
            Self(self.0 - rhs.0)
        }
    }

    impl Neg for Vector3 {
        type Output = Vector3;

        fn neg(self) -> Vector3 {
            Self(-self.0)
        }
    }

    impl Mul<f64> for Vector3 {
        type Output = Vector3;

        fn mul(self, rhs: f64) -> Vector3 {
            Self(self.0 * rhs)
        }
    }

    impl fmt::Display for Vector3 {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "({:.3}, {:.3}, {:.3})", self.0.x, self.0.y, self.0.z)
        }
    }

    /// 屏幕坐标（像素），原点位于边界圆圆心。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        /// 球面向量在默认视图（未旋转、正投影）下的屏幕位置。
        #[inline]
        pub fn default_screen_location(vector: Vector3, boundary_radius: f64) -> Self {
            Self::new(vector.x() * boundary_radius, vector.y() * boundary_radius)
        }
    }

}

pub mod settings {
    use serde::{Deserialize, Serialize};

    /// 影响几何判定的可调参数，默认值以 250 像素的边界圆为基准。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct GeometrySettings {
        /// 边界圆半径（像素）。
        pub boundary_radius: f64,
        /// 线段端点在屏幕上小于该像素距离时视为“近似对径”。
        pub nearly_antipodal_pixel: f64,
        pub point_hit_distance: f64,
        pub line_hit_distance: f64,
        pub segment_hit_distance: f64,
        pub circle_hit_distance: f64,
        /// 点拾取时允许的屏幕距离（像素）。
        pub pixel_close_enough: f64,
    }

    impl Default for GeometrySettings {
        fn default() -> Self {
            Self {
                boundary_radius: 250.0,
                nearly_antipodal_pixel: 3.0,
                point_hit_distance: 0.04,
                line_hit_distance: 0.04,
                segment_hit_distance: 0.04,
                circle_hit_distance: 0.04,
                pixel_close_enough: 8.0,
            }
        }
    }

    /// 新建对象时其标签是否默认显示。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LabelSettings {
        pub free_points: bool,
        pub non_free_points: bool,
        pub lines: bool,
        pub segments: bool,
        pub circles: bool,
    }

    impl Default for LabelSettings {
        fn default() -> Self {
            Self {
                free_points: true,
                non_free_points: false,
                lines: false,
                segments: false,
                circles: false,
            }
        }
    }
}
