//! 拾取：按球面位置（以及点的屏幕位置）查找附近的对象。

use sphere_core::geometry::{Point2, Vector3};
use sphere_core::intersection::SegmentShape;

use crate::graph::{Graph, NodeId, NodeKind};

impl Graph {
    /// 对象是否在 `unit_vector` 附近。拾取阈值随放大倍数缩小。
    pub fn is_hit_at(&self, id: NodeId, unit_vector: Vector3, magnification: f64) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let magnification = if magnification > 0.0 { magnification } else { 1.0 };
        let settings = self.settings();
        match *node.kind() {
            NodeKind::FreePoint { location }
            | NodeKind::IntersectionPoint { location, .. }
            | NodeKind::PolarPoint { location, .. } => {
                location.angle_to(unit_vector) < settings.point_hit_distance / magnification
            }
            NodeKind::Line { normal, .. } => {
                (unit_vector.dot(normal)).abs() < settings.line_hit_distance / magnification
            }
            NodeKind::Segment { start, arc, .. } => {
                if unit_vector.dot(arc.normal).abs()
                    >= settings.segment_hit_distance / magnification
                {
                    return false;
                }
                // 投影到线段所在大圆，端点外的拾取阈值内也算命中
                let projected = (unit_vector - arc.normal * unit_vector.dot(arc.normal))
                    .normalize_or_zero();
                let midpoint =
                    SegmentShape::new(self.location_of(start), arc.normal, arc.arc_length)
                        .midpoint();
                !projected.is_zero()
                    && midpoint.angle_to(projected)
                        < arc.arc_length / 2.0 + settings.segment_hit_distance / magnification
            }
            NodeKind::Circle { center, radius, .. } => {
                (self.location_of(center).angle_to(unit_vector) - radius).abs()
                    < settings.circle_hit_distance / magnification
            }
            _ => false,
        }
    }

    /// 附近的点：既要在球面上足够近，默认屏幕位置也要在 `pixel_close_enough` 以内。
    pub fn find_nearby_points(
        &self,
        unit_vector: Vector3,
        screen_position: Point2,
        magnification: f64,
    ) -> Vec<NodeId> {
        let radius = self.settings().boundary_radius;
        let close_enough = self.settings().pixel_close_enough;
        self.points()
            .iter()
            .copied()
            .filter(|id| self.node(*id).is_some_and(|node| node.exists()))
            .filter(|id| self.is_hit_at(*id, unit_vector, magnification))
            .filter(|id| {
                let location = self.location_of(*id);
                Point2::default_screen_location(location, radius).distance(screen_position)
                    < close_enough
            })
            .collect()
    }

    pub fn find_nearby_lines(&self, unit_vector: Vector3, magnification: f64) -> Vec<NodeId> {
        self.nearby_in(self.lines(), unit_vector, magnification)
    }

    pub fn find_nearby_segments(&self, unit_vector: Vector3, magnification: f64) -> Vec<NodeId> {
        self.nearby_in(self.segments(), unit_vector, magnification)
    }

    pub fn find_nearby_circles(&self, unit_vector: Vector3, magnification: f64) -> Vec<NodeId> {
        self.nearby_in(self.circles(), unit_vector, magnification)
    }

    fn nearby_in(&self, ids: &[NodeId], unit_vector: Vector3, magnification: f64) -> Vec<NodeId> {
        ids.iter()
            .copied()
            .filter(|id| self.node(*id).is_some_and(|node| node.exists()))
            .filter(|id| self.is_hit_at(*id, unit_vector, magnification))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z).normalize_or_zero()
    }

    fn scene() -> (Graph, [NodeId; 5]) {
        let mut graph = Graph::default();
        let north = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let east = graph.create_free_point(unit(1.0, 0.0, 0.0));
        let segment = graph.create_segment(north, east).unwrap();
        let line = graph.create_line(north, east).unwrap();
        let circle = graph.create_circle(north, east).unwrap();
        for id in [north, east, segment, line, circle] {
            graph.attach(id).unwrap();
        }
        (graph, [north, east, segment, line, circle])
    }

    #[test]
    fn points_require_screen_proximity() {
        let (graph, [_, east, ..]) = scene();
        let click = unit(1.0, 0.01, 0.0);
        let screen = Point2::new(250.0, 2.5);
        assert_eq!(graph.find_nearby_points(click, screen, 1.0), vec![east]);
        assert!(graph.find_nearby_points(click, Point2::new(0.0, 0.0), 1.0).is_empty());
    }

    #[test]
    fn segments_only_hit_inside_their_arc() {
        let (graph, [_, _, segment, line, circle]) = scene();
        let inside = unit(1.0, 0.0, 1.0);
        let outside = unit(-1.0, 0.0, -1.0);
        assert_eq!(graph.find_nearby_segments(inside, 1.0), vec![segment]);
        assert!(graph.find_nearby_segments(outside, 1.0).is_empty());
        assert_eq!(graph.find_nearby_lines(outside, 1.0), vec![line]);
        // 圆心在北极、半径 π/2，即赤道
        assert_eq!(graph.find_nearby_circles(unit(0.0, 1.0, 0.01), 1.0), vec![circle]);
    }

    #[test]
    fn segment_hits_extend_slightly_past_the_endpoints() {
        let (graph, [_, _, segment, ..]) = scene();
        let just_past = unit(1.0, 0.0, -0.02);
        let far_past = unit(1.0, 0.0, -0.1);
        assert!(graph.is_hit_at(segment, just_past, 1.0));
        assert!(!graph.is_hit_at(segment, far_past, 1.0));
        assert!(!graph.is_hit_at(segment, just_past, 10.0));
    }

    #[test]
    fn magnification_shrinks_the_hit_zone() {
        let (graph, [north, ..]) = scene();
        let click = unit(0.03, 0.0, 1.0);
        assert!(graph.is_hit_at(north, click, 1.0));
        assert!(!graph.is_hit_at(north, click, 10.0));
    }
}
