//! 一维对象求交算法库
//!
//! 所有函数均为纯函数，返回有序的两个解（正解在前，负解在后）。
//! 调用方必须按照规范顺序传参：直线 < 线段 < 圆，同类对象按名称字母序；
//! 交换参数不保证得到对调后的结果，交点序号的稳定性依赖于该约定。

use std::f64::consts::{FRAC_PI_2, PI};

use crate::geometry::Vector3;

/// 圆与圆相切时视为不相交所用的角度容差（弧度）。
pub const ANGLE_TOLERANCE: f64 = 1e-9;

/// 单个交点候选：位置向量及其是否存在。不存在时向量可能为零向量。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionResult {
    pub vector: Vector3,
    pub exists: bool,
}

impl IntersectionResult {
    #[inline]
    pub fn new(vector: Vector3, exists: bool) -> Self {
        Self { vector, exists }
    }

    #[inline]
    pub fn missing() -> Self {
        Self {
            vector: Vector3::ZERO,
            exists: false,
        }
    }
}

/// 一维对象的种类，派生的 `Ord` 即规范顺序中的种类顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CurveKind {
    Line,
    Segment,
    Circle,
}

impl CurveKind {
    pub fn describe(self) -> &'static str {
        match self {
            CurveKind::Line => "line",
            CurveKind::Segment => "segment",
            CurveKind::Circle => "circle",
        }
    }
}

/// 大圆（直线），由单位法向量确定。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineShape {
    pub normal: Vector3,
}

impl LineShape {
    #[inline]
    pub fn new(normal: Vector3) -> Self {
        Self { normal }
    }
}

/// 大圆弧（线段）：起点、所在平面法向量与弧长。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentShape {
    pub start: Vector3,
    pub normal: Vector3,
    pub arc_length: f64,
}

impl SegmentShape {
    #[inline]
    pub fn new(start: Vector3, normal: Vector3, arc_length: f64) -> Self {
        Self {
            start,
            normal,
            arc_length,
        }
    }

    /// 线段的绘制方向：`normal × start`，长于 π 时取反。
    pub fn direction(&self) -> Vector3 {
        let sign = if self.arc_length > PI { -1.0 } else { 1.0 };
        self.normal.cross(self.start) * sign
    }

    pub fn midpoint(&self) -> Vector3 {
        let half = self.arc_length / 2.0;
        self.start * half.cos() + self.direction() * half.sin()
    }

    /// 已知 `vector` 位于线段所在大圆上，判定它是否落在线段内。
    pub fn contains(&self, vector: Vector3) -> bool {
        self.midpoint().angle_to(vector) <= self.arc_length / 2.0
    }
}

/// 球面圆：中心与角半径。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleShape {
    pub center: Vector3,
    pub radius: f64,
}

impl CircleShape {
    #[inline]
    pub fn new(center: Vector3, radius: f64) -> Self {
        Self { center, radius }
    }
}

/// 参与求交的一维对象。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OneDimensional {
    Line(LineShape),
    Segment(SegmentShape),
    Circle(CircleShape),
}

impl OneDimensional {
    #[inline]
    pub fn kind(&self) -> CurveKind {
        match self {
            OneDimensional::Line(_) => CurveKind::Line,
            OneDimensional::Segment(_) => CurveKind::Segment,
            OneDimensional::Circle(_) => CurveKind::Circle,
        }
    }
}

/// 按种类对分派到具体算法。若 `first` 的种类排在 `second` 之后则返回 `None`，
/// 同种类内的名称顺序由调用方保证。
pub fn intersect(
    first: &OneDimensional,
    second: &OneDimensional,
) -> Option<[IntersectionResult; 2]> {
    use OneDimensional::{Circle, Line, Segment};

    let results = match (first, second) {
        (Line(a), Line(b)) => intersect_line_with_line(a, b),
        (Line(a), Segment(b)) => intersect_line_with_segment(a, b),
        (Line(a), Circle(b)) => intersect_line_with_circle(a, b),
        (Segment(a), Segment(b)) => intersect_segment_with_segment(a, b),
        (Segment(a), Circle(b)) => intersect_segment_with_circle(a, b),
        (Circle(a), Circle(b)) => intersect_circle_with_circle(a, b),
        _ => return None,
    };
    Some(results)
}

/// 两个法向量叉积的正负方向。法向量相同或对径时返回 `None`。
fn plane_crossings(first_normal: Vector3, second_normal: Vector3) -> Option<(Vector3, Vector3)> {
    let crossing = first_normal.cross(second_normal);
    if crossing.is_zero() {
        return None;
    }
    let positive = crossing.normalize_or_zero();
    Some((positive, -positive))
}

pub fn intersect_line_with_line(
    first: &LineShape,
    second: &LineShape,
) -> [IntersectionResult; 2] {
    match plane_crossings(first.normal, second.normal) {
        Some((positive, negative)) => [
            IntersectionResult::new(positive, true),
            IntersectionResult::new(negative, true),
        ],
        None => [IntersectionResult::missing(), IntersectionResult::missing()],
    }
}

pub fn intersect_line_with_segment(
    line: &LineShape,
    segment: &SegmentShape,
) -> [IntersectionResult; 2] {
    match plane_crossings(line.normal, segment.normal) {
        Some((positive, negative)) => [
            IntersectionResult::new(positive, segment.contains(positive)),
            IntersectionResult::new(negative, segment.contains(negative)),
        ],
        None => [IntersectionResult::missing(), IntersectionResult::missing()],
    }
}

pub fn intersect_segment_with_segment(
    first: &SegmentShape,
    second: &SegmentShape,
) -> [IntersectionResult; 2] {
    match plane_crossings(first.normal, second.normal) {
        Some((positive, negative)) => [
            IntersectionResult::new(
                positive,
                first.contains(positive) && second.contains(positive),
            ),
            IntersectionResult::new(
                negative,
                first.contains(negative) && second.contains(negative),
            ),
        ],
        None => [IntersectionResult::missing(), IntersectionResult::missing()],
    }
}

/// 直线视为以法向量为中心、角半径 π/2 的圆。
pub fn intersect_line_with_circle(
    line: &LineShape,
    circle: &CircleShape,
) -> [IntersectionResult; 2] {
    intersect_circles(line.normal, FRAC_PI_2, circle.center, circle.radius)
}

pub fn intersect_segment_with_circle(
    segment: &SegmentShape,
    circle: &CircleShape,
) -> [IntersectionResult; 2] {
    let mut results = intersect_circles(segment.normal, FRAC_PI_2, circle.center, circle.radius);
    for result in &mut results {
        // 零向量不是单位向量，不能交给 contains 判定
        result.exists = result.exists && !result.vector.is_zero() && segment.contains(result.vector);
    }
    results
}

pub fn intersect_circle_with_circle(
    first: &CircleShape,
    second: &CircleShape,
) -> [IntersectionResult; 2] {
    intersect_circles(first.center, first.radius, second.center, second.radius)
}

/// 把圆改写为角半径不超过 π/2 的等价表示（中心取反、半径取补）。
fn hemisphere_form(center: Vector3, radius: f64) -> (Vector3, f64) {
    let center = center.normalize_or_zero();
    if radius > FRAC_PI_2 {
        (-center, PI - radius)
    } else {
        (center, radius)
    }
}

/// 两个球面圆的交点。参数顺序有意义：正解位于 `center1 × center2` 一侧。
///
/// 三条边 `d, r1, r2` 满足严格三角不等式（容差 [`ANGLE_TOLERANCE`]）时两圆相交，
/// 相切按不相交处理。相交时以 center2 为顶点解球面三角形：先由半周长公式求出
/// 与 r1 相对的角 A，再按纳皮尔法则求直角三角形两条直角边 a、b。
pub fn intersect_circles(
    center1: Vector3,
    radius1: f64,
    center2: Vector3,
    radius2: f64,
) -> [IntersectionResult; 2] {
    let (c1, r1) = hemisphere_form(center1, radius1);
    let (c2, r2) = hemisphere_form(center2, radius2);
    let d = c1.angle_to(c2);

    let reaches = d + ANGLE_TOLERANCE < r1 + r2
        && r1 + ANGLE_TOLERANCE < d + r2
        && r2 + ANGLE_TOLERANCE < d + r1;
    if !reaches {
        return [IntersectionResult::missing(), IntersectionResult::missing()];
    }

    let normal = c1.cross(c2);
    if normal.is_zero() {
        return [IntersectionResult::missing(), IntersectionResult::missing()];
    }
    let normal = normal.normalize_or_zero();

    let s = (r1 + r2 + d) / 2.0;
    let ratio = ((s - d).sin() * (s - r2).sin()) / (s.sin() * (s - r1).sin());
    let angle_a = 2.0 * ratio.max(0.0).sqrt().atan();

    // a：交点到两圆心所在大圆的距离；b：垂足到 center2 的有向距离
    let a = (r2.sin() * angle_a.sin()).clamp(-1.0, 1.0).asin();
    let b = (r2.tan() * angle_a.cos()).atan();

    // (center2, toward, normal) 构成正交标架，toward 指向 center1 一侧
    let toward = c2.cross(normal).normalize_or_zero();
    let foot = c2 * b.cos() + toward * b.sin();

    [
        IntersectionResult::new(foot * a.cos() + normal * a.sin(), true),
        IntersectionResult::new(foot * a.cos() - normal * a.sin(), true),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z).normalize_or_zero()
    }

    fn assert_on_both(result: &IntersectionResult, first: &CircleShape, second: &CircleShape) {
        assert!(result.exists);
        let (c1, r1) = hemisphere_form(first.center, first.radius);
        let (c2, r2) = hemisphere_form(second.center, second.radius);
        assert!((result.vector.length() - 1.0).abs() < 1e-9);
        assert!((c1.angle_to(result.vector) - r1).abs() < 1e-9);
        assert!((c2.angle_to(result.vector) - r2).abs() < 1e-9);
    }

    #[test]
    fn perpendicular_lines_meet_on_the_y_axis_in_order() {
        let first = LineShape::new(Vector3::new(0.0, 0.0, 1.0));
        let second = LineShape::new(Vector3::new(1.0, 0.0, 0.0));
        let [positive, negative] = intersect_line_with_line(&first, &second);
        assert!(positive.exists && negative.exists);
        assert!(positive.vector.near(Vector3::new(0.0, 1.0, 0.0)));
        assert!(negative.vector.near(Vector3::new(0.0, -1.0, 0.0)));
    }

    #[test]
    fn identical_or_antipodal_normals_never_produce_nan() {
        let normal = unit(0.3, -0.2, 0.9);
        for other in [normal, -normal] {
            let results = intersect_line_with_line(&LineShape::new(normal), &LineShape::new(other));
            for result in results {
                assert!(!result.exists);
                assert!(result.vector.x().is_finite());
                assert!(result.vector.is_zero());
            }
        }
    }

    #[test]
    fn segment_containment_filters_candidates() {
        // 从 +z 到 +x 的四分之一圆弧，位于 y = 0 平面
        let segment = SegmentShape::new(Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 1.0, 0.0), FRAC_PI_2);
        // 经过 (1,0,1)/√2 与 +y 的大圆
        let line = LineShape::new(unit(1.0, 0.0, -1.0));
        let results = intersect_line_with_segment(&line, &segment);
        let hits: Vec<_> = results.iter().filter(|result| result.exists).collect();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].vector.near(unit(1.0, 0.0, 1.0)));
    }

    #[test]
    fn long_segment_contains_the_far_side() {
        let segment = SegmentShape::new(Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 1.0, 0.0), 3.0 * FRAC_PI_2);
        assert!(segment.contains(Vector3::new(-1.0, 0.0, 0.0)));
        assert!(segment.contains(Vector3::new(0.0, 0.0, -1.0)));
        assert!(!segment.contains(unit(1.0, 0.0, 1.0)));
    }

    #[test]
    fn equator_meets_small_circle_at_known_points() {
        let line = LineShape::new(Vector3::new(0.0, 0.0, 1.0));
        let circle = CircleShape::new(Vector3::new(1.0, 0.0, 0.0), std::f64::consts::FRAC_PI_4);
        let [positive, negative] = intersect_line_with_circle(&line, &circle);
        assert!(positive.vector.near(unit(1.0, 1.0, 0.0)));
        assert!(negative.vector.near(unit(1.0, -1.0, 0.0)));
    }

    #[test]
    fn circle_solutions_lie_on_both_circles() {
        let cases = [
            (CircleShape::new(unit(0.0, 0.0, 1.0), 0.6), CircleShape::new(unit(0.5, 0.0, 1.0), 0.4)),
            (CircleShape::new(unit(0.2, 0.1, 1.0), 1.2), CircleShape::new(unit(1.0, 0.3, 0.2), 0.9)),
            // 角 A 为钝角
            (CircleShape::new(unit(0.0, 0.0, 1.0), 0.9), CircleShape::new(unit(0.4, 0.0, 1.0), 0.7)),
            // 半径大于 π/2 的圆
            (CircleShape::new(unit(0.0, 0.0, 1.0), 2.0), CircleShape::new(unit(1.0, 0.0, 0.0), 0.8)),
        ];
        for (first, second) in cases {
            let [positive, negative] = intersect_circle_with_circle(&first, &second);
            assert_on_both(&positive, &first, &second);
            assert_on_both(&negative, &first, &second);
            let (c1, _) = hemisphere_form(first.center, first.radius);
            let (c2, _) = hemisphere_form(second.center, second.radius);
            assert!(positive.vector.dot(c1.cross(c2)) > 0.0);
            assert!(negative.vector.dot(c1.cross(c2)) < 0.0);
        }
    }

    #[test]
    fn circle_existence_follows_triangle_law() {
        let north = Vector3::new(0.0, 0.0, 1.0);
        let tilted = |d: f64| Vector3::new(d.sin(), 0.0, d.cos());

        // 相距太远
        let far = intersect_circles(north, 0.2, tilted(1.0), 0.3);
        assert!(far.iter().all(|r| !r.exists && r.vector.is_zero()));
        // 一圆包含另一圆
        let nested = intersect_circles(north, 1.0, tilted(0.1), 0.2);
        assert!(nested.iter().all(|r| !r.exists));
        // 外切按不相交处理
        let tangent = intersect_circles(north, 0.3, tilted(0.5), 0.2);
        assert!(tangent.iter().all(|r| !r.exists));
        // 内切同样不相交
        let inner = intersect_circles(north, 0.5, tilted(0.2), 0.3);
        assert!(inner.iter().all(|r| !r.exists));
        // 稍微重叠即相交
        let overlap = intersect_circles(north, 0.3, tilted(0.49), 0.2);
        assert!(overlap.iter().all(|r| r.exists));
    }

    #[test]
    fn segment_circle_misses_report_zero_vectors_as_missing() {
        let segment = SegmentShape::new(Vector3::new(0.0, 0.0, 1.0), Vector3::new(0.0, 1.0, 0.0), 0.5);
        let circle = CircleShape::new(Vector3::new(0.0, 1.0, 0.0), 0.1);
        let results = intersect_segment_with_circle(&segment, &circle);
        assert!(results.iter().all(|r| !r.exists));
    }

    #[test]
    fn dispatch_rejects_non_canonical_kind_order() {
        let line = OneDimensional::Line(LineShape::new(Vector3::new(0.0, 0.0, 1.0)));
        let circle = OneDimensional::Circle(CircleShape::new(Vector3::new(1.0, 0.0, 0.0), 0.5));
        assert!(intersect(&line, &circle).is_some());
        assert!(intersect(&circle, &line).is_none());
        assert!(CurveKind::Line < CurveKind::Segment && CurveKind::Segment < CurveKind::Circle);
    }
}
