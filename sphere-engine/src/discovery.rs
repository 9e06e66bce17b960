//! 新建一维对象时自动发现它与已有对象的全部交点。

use sphere_core::geometry::Vector3;
use sphere_core::intersection::{CurveKind, IntersectionResult, intersect};
use tracing::{debug, trace};

use crate::errors::EngineError;
use crate::graph::{Graph, NodeId, NodeKind};

/// 规避集合中的位置：与其重合的交点不再重复创建。
#[derive(Debug, Default, Clone)]
pub struct AvoidSet {
    vectors: Vec<Vector3>,
}

impl AvoidSet {
    #[inline]
    pub fn push(&mut self, vector: Vector3) {
        self.vectors.push(vector);
    }

    pub fn contains(&self, vector: Vector3) -> bool {
        self.vectors.iter().any(|existing| existing.near(vector))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl Graph {
    /// 求两个一维对象的交点，参数必须已按规范顺序排列。
    pub fn intersect_two_objects(
        &self,
        first: NodeId,
        second: NodeId,
    ) -> Result<[IntersectionResult; 2], EngineError> {
        let shape = |id: NodeId| {
            let node = self.require(id)?;
            self.shape_of(id)
                .ok_or_else(|| EngineError::NotOneDimensional(node.name().to_string()))
        };
        let (a, b) = (shape(first)?, shape(second)?);
        intersect(&a, &b).ok_or_else(|| EngineError::NonCanonicalPair {
            first: self.name_of(first).unwrap_or_default().to_string(),
            second: self.name_of(second).unwrap_or_default().to_string(),
        })
    }

    pub fn create_all_intersections_with_line(
        &mut self,
        line: NodeId,
    ) -> Result<Vec<NodeId>, EngineError> {
        self.expect_curve(line, CurveKind::Line)?;
        self.create_all_intersections_with(line)
    }

    pub fn create_all_intersections_with_segment(
        &mut self,
        segment: NodeId,
    ) -> Result<Vec<NodeId>, EngineError> {
        self.expect_curve(segment, CurveKind::Segment)?;
        self.create_all_intersections_with(segment)
    }

    pub fn create_all_intersections_with_circle(
        &mut self,
        circle: NodeId,
    ) -> Result<Vec<NodeId>, EngineError> {
        self.expect_curve(circle, CurveKind::Circle)?;
        self.create_all_intersections_with(circle)
    }

    /// 为 `new_object` 与图中每个一维对象的每个候选交点创建隐藏的交点对象。
    ///
    /// 与已有点或新对象定义点重合的候选会被跳过；当前不存在的候选也会创建，
    /// 以便之后拖动使其出现。返回的对象尚未挂入图中。
    pub fn create_all_intersections_with(
        &mut self,
        new_object: NodeId,
    ) -> Result<Vec<NodeId>, EngineError> {
        if self.require(new_object)?.kind().curve_kind().is_none() {
            return Err(EngineError::NotOneDimensional(
                self.name_of(new_object)?.to_string(),
            ));
        }
        let avoid = self.avoid_set_for(new_object)?;

        let others: Vec<NodeId> = self
            .lines()
            .iter()
            .chain(self.segments())
            .chain(self.circles())
            .copied()
            .filter(|other| *other != new_object)
            .collect();

        let mut created = Vec::new();
        for other in others {
            let (first, second) = self.canonical_pair(new_object, other)?;
            let results = self.intersect_two_objects(first, second)?;
            for (order, result) in results.iter().enumerate() {
                if avoid.contains(result.vector) {
                    trace!(order, first = %first, second = %second, "交点与已有点重合，跳过");
                    continue;
                }
                created.push(self.create_intersection_point(first, second, order, false)?);
            }
        }

        debug!(
            object = self.name_of(new_object)?,
            avoided = avoid.len(),
            created = created.len(),
            "已发现交点"
        );
        Ok(created)
    }

    fn avoid_set_for(&self, new_object: NodeId) -> Result<AvoidSet, EngineError> {
        let mut avoid = AvoidSet::default();
        for point in self.points() {
            if let Some(location) = self.node(*point).and_then(|node| node.location()) {
                avoid.push(location);
            }
        }
        let defining = match *self.require(new_object)?.kind() {
            NodeKind::Line { start, end, .. } | NodeKind::Segment { start, end, .. } => {
                vec![start, end]
            }
            NodeKind::Circle {
                center,
                circle_point,
                ..
            } => vec![center, circle_point],
            _ => Vec::new(),
        };
        for point in defining {
            avoid.push(self.location_of(point));
        }
        Ok(avoid)
    }

    fn expect_curve(&self, id: NodeId, kind: CurveKind) -> Result<(), EngineError> {
        if self.require(id)?.kind().curve_kind() == Some(kind) {
            Ok(())
        } else {
            Err(self.wrong_kind(id, kind.describe()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z).normalize_or_zero()
    }

    fn free(graph: &mut Graph, v: Vector3) -> NodeId {
        let id = graph.create_free_point(v);
        graph.attach(id).unwrap();
        id
    }

    #[test]
    fn shared_endpoint_is_not_duplicated() {
        let mut graph = Graph::default();
        let north = free(&mut graph, unit(0.0, 0.0, 1.0));
        let east = free(&mut graph, unit(1.0, 0.0, 0.0));
        let south_west = free(&mut graph, unit(-1.0, -1.0, 0.0));
        let first = graph.create_line(north, east).unwrap();
        graph.attach(first).unwrap();

        let second = graph.create_line(north, south_west).unwrap();
        let created = graph.create_all_intersections_with_line(second).unwrap();
        // 交于 north 与其对径点，前者被规避
        assert_eq!(created.len(), 1);
        let point = graph.node(created[0]).unwrap();
        assert!(point.location().unwrap().near(unit(0.0, 0.0, -1.0)));
        assert!(!point.showing());
        assert_eq!(point.parents(), &[first, second]);
    }

    #[test]
    fn existing_point_on_the_new_line_is_not_duplicated() {
        let mut graph = Graph::default();
        let north = free(&mut graph, unit(0.0, 0.0, 1.0));
        let east = free(&mut graph, unit(1.0, 0.0, 0.0));
        let meridian = graph.create_line(north, east).unwrap();
        graph.attach(meridian).unwrap();

        // 新直线（赤道）经过 east，但 east 不是它的定义点
        let a = free(&mut graph, unit(1.0, 1.0, 0.0));
        let b = free(&mut graph, unit(1.0, -1.0, 0.0));
        let equator = graph.create_line(a, b).unwrap();
        let created = graph.create_all_intersections_with_line(equator).unwrap();
        assert_eq!(created.len(), 1);
        let location = graph.node(created[0]).unwrap().location().unwrap();
        assert!(location.near(unit(-1.0, 0.0, 0.0)));
        assert!(
            created
                .iter()
                .all(|id| !graph.node(*id).unwrap().location().unwrap().near(unit(1.0, 0.0, 0.0)))
        );
    }

    #[test]
    fn missing_candidates_are_still_created() {
        let mut graph = Graph::default();
        let center = free(&mut graph, unit(0.0, 0.0, 1.0));
        let rim = free(&mut graph, unit(0.2, 0.0, 1.0));
        let circle = graph.create_circle(center, rim).unwrap();
        graph.attach(circle).unwrap();

        let a = free(&mut graph, unit(1.0, 0.0, 0.0));
        let b = free(&mut graph, unit(0.0, 1.0, 0.0));
        let equator = graph.create_line(a, b).unwrap();
        let created = graph.create_all_intersections_with_line(equator).unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|id| !graph.node(*id).unwrap().exists()));
    }

    #[test]
    fn circle_discovery_orders_pairs_canonically() {
        let mut graph = Graph::default();
        let a = free(&mut graph, unit(1.0, 0.0, 0.0));
        let b = free(&mut graph, unit(0.0, 1.0, 0.0));
        let equator = graph.create_line(a, b).unwrap();
        graph.attach(equator).unwrap();

        let center = free(&mut graph, unit(0.0, 0.0, 1.0));
        let rim = free(&mut graph, unit(1.0, 1.0, 1.0));
        let circle = graph.create_circle(center, rim).unwrap();
        let created = graph.create_all_intersections_with_circle(circle).unwrap();
        for id in &created {
            assert_eq!(graph.node(*id).unwrap().parents(), &[equator, circle]);
        }
        assert!(matches!(
            graph.create_all_intersections_with_segment(circle),
            Err(EngineError::WrongKind { .. })
        ));
        assert!(matches!(
            graph.intersect_two_objects(circle, equator),
            Err(EngineError::NonCanonicalPair { .. })
        ));
    }
}
