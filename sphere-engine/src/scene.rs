//! 场景：依赖图 + 命令日志 + 设置。所有修改都经由命令执行，因此都可撤销、可序列化。

use sphere_core::geometry::Vector3;
use sphere_core::settings::{GeometrySettings, LabelSettings};
use sphere_core::style::{StyleOptions, StylePanel};
use tracing::debug;

use crate::command::{Command, CommandLog, ReplayPolicy, ReplayReport};
use crate::errors::EngineError;
use crate::graph::{CoordinateAxis, Graph, NodeCategory, NodeId, NodeKind};

#[derive(Debug)]
pub struct Scene {
    graph: Graph,
    log: CommandLog,
    labels: LabelSettings,
}

/// [`Scene::populate_demo`] 创建的关键对象。
#[derive(Debug, Clone)]
pub struct DemoObjects {
    pub north: NodeId,
    pub east: NodeId,
    pub south_east: NodeId,
    pub rim: NodeId,
    pub meridian: NodeId,
    pub segment: NodeId,
    pub circle: NodeId,
    pub pole: NodeId,
    pub length: NodeId,
}

impl Scene {
    pub fn new() -> Self {
        Self::with_settings(GeometrySettings::default(), LabelSettings::default())
    }

    pub fn with_settings(geometry: GeometrySettings, labels: LabelSettings) -> Self {
        Self {
            graph: Graph::new(geometry),
            log: CommandLog::new(),
            labels,
        }
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[inline]
    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    #[inline]
    pub fn label_settings(&self) -> &LabelSettings {
        &self.labels
    }

    fn run(&mut self, command: Command) -> Result<(), EngineError> {
        self.log.execute(command, &mut self.graph)
    }

    fn labelled(&mut self, id: NodeId, showing: bool) -> Result<Command, EngineError> {
        let label = self.graph.create_label(id)?;
        self.graph.set_showing(label, showing)?;
        Ok(Command::add(id, Some(label)))
    }

    /// 在球面上放置自由点，位置会被归一化。
    pub fn add_free_point(&mut self, location: Vector3) -> Result<NodeId, EngineError> {
        let location = location.normalize().ok_or(EngineError::DegenerateVector)?;
        let id = self.graph.create_free_point(location);
        let command = self.labelled(id, self.labels.free_points)?;
        self.run(command)?;
        Ok(id)
    }

    pub fn add_line(&mut self, start: NodeId, end: NodeId) -> Result<NodeId, EngineError> {
        let id = self.graph.create_line(start, end)?;
        self.add_curve(id, self.labels.lines)
    }

    pub fn add_segment(&mut self, start: NodeId, end: NodeId) -> Result<NodeId, EngineError> {
        let id = self.graph.create_segment(start, end)?;
        self.add_curve(id, self.labels.segments)
    }

    pub fn add_circle(&mut self, center: NodeId, circle_point: NodeId) -> Result<NodeId, EngineError> {
        let id = self.graph.create_circle(center, circle_point)?;
        self.add_curve(id, self.labels.circles)
    }

    /// 新曲线与自动发现的交点作为一条组合命令执行。
    fn add_curve(&mut self, id: NodeId, label_showing: bool) -> Result<NodeId, EngineError> {
        let mut commands = vec![self.labelled(id, label_showing)?];
        let discovered = self.graph.create_all_intersections_with(id)?;
        for point in &discovered {
            commands.push(self.labelled(*point, self.labels.non_free_points)?);
        }
        debug!(
            object = self.graph.name_of(id)?,
            intersections = discovered.len(),
            "添加曲线"
        );
        self.run(Command::group(commands))?;
        Ok(id)
    }

    /// 用户显式放置交点：已有对应的自动交点时将其转为用户交点，否则新建。
    pub fn add_intersection_point(
        &mut self,
        first: NodeId,
        second: NodeId,
        order: usize,
    ) -> Result<NodeId, EngineError> {
        let (parent1, parent2) = self.graph.canonical_pair(first, second)?;
        let existing = self.graph.points().iter().copied().find(|id| {
            matches!(
                self.graph.node(*id).map(|node| *node.kind()),
                Some(NodeKind::IntersectionPoint { parent1: p1, parent2: p2, order: o, .. })
                    if p1 == parent1 && p2 == parent2 && o == order
            )
        });
        if let Some(id) = existing {
            self.convert_to_user_created(id)?;
            return Ok(id);
        }

        let id = self
            .graph
            .create_intersection_point(parent1, parent2, order, true)?;
        let command = self.labelled(id, self.labels.non_free_points)?;
        self.run(command)?;
        Ok(id)
    }

    /// 把自动发现的交点转为用户交点（显示并恢复默认样式）。已是用户交点时不做任何事。
    pub fn convert_to_user_created(&mut self, id: NodeId) -> Result<(), EngineError> {
        match *self.graph.require(id)?.kind() {
            NodeKind::IntersectionPoint {
                is_user_created: false,
                ..
            } => self.run(Command::convert_to_user_created(id)),
            NodeKind::IntersectionPoint { .. } => Ok(()),
            _ => Err(self.graph.wrong_kind(id, "intersection point")),
        }
    }

    pub fn add_polar_point(&mut self, parent: NodeId, index: usize) -> Result<NodeId, EngineError> {
        let id = self.graph.create_polar_point(parent, index)?;
        let command = self.labelled(id, self.labels.non_free_points)?;
        self.run(command)?;
        Ok(id)
    }

    pub fn add_point_coordinate(
        &mut self,
        point: NodeId,
        axis: CoordinateAxis,
    ) -> Result<NodeId, EngineError> {
        let id = self.graph.create_point_coordinate(point, axis)?;
        self.run(Command::add(id, None))?;
        Ok(id)
    }

    pub fn add_segment_length(&mut self, segment: NodeId) -> Result<NodeId, EngineError> {
        let id = self.graph.create_segment_length(segment)?;
        self.run(Command::add(id, None))?;
        Ok(id)
    }

    /// 把自由点移动到新位置（会被归一化），依赖对象随之更新。
    pub fn move_point(&mut self, point: NodeId, to: Vector3) -> Result<(), EngineError> {
        let to = to.normalize().ok_or(EngineError::DegenerateVector)?;
        let node = self.graph.require(point)?;
        let Some(from) = node.location().filter(|_| matches!(node.kind(), NodeKind::FreePoint { .. }))
        else {
            return Err(EngineError::NotMovable(node.name().to_string()));
        };
        self.run(Command::move_point(point, from, to))
    }

    /// 删除对象及其所有后代。
    pub fn delete(&mut self, id: NodeId) -> Result<(), EngineError> {
        if !self.graph.require(id)?.in_graph() {
            return Err(EngineError::NodeNotFound(id.get()));
        }
        self.run(Command::delete(id))
    }

    /// 把 `changes` 中已设置的字段合并到对象某个面板的样式上。
    pub fn set_style(
        &mut self,
        id: NodeId,
        panel: StylePanel,
        changes: &StyleOptions,
    ) -> Result<(), EngineError> {
        let before = self.graph.require(id)?.style().panel(panel).clone();
        let mut after = before.clone();
        after.apply(changes);
        self.run(Command::change_style(id, panel, before, after))
    }

    pub fn set_showing(&mut self, id: NodeId, showing: bool) -> Result<(), EngineError> {
        let before = self.graph.require(id)?.showing();
        self.run(Command::set_showing(id, before, showing))
    }

    pub fn undo(&mut self) -> Result<bool, EngineError> {
        self.log.undo(&mut self.graph)
    }

    pub fn redo(&mut self) -> Result<bool, EngineError> {
        self.log.redo(&mut self.graph)
    }

    pub fn to_script(&self) -> Result<String, EngineError> {
        self.log.to_script(&self.graph)
    }

    pub fn replay(&mut self, script: &str, policy: ReplayPolicy) -> Result<ReplayReport, EngineError> {
        self.log.replay(script, &mut self.graph, policy)
    }

    /// 统计各类对象数量，便于 CLI 输出。
    pub fn summary(&self) -> SceneSummary {
        let mut summary = SceneSummary::default();
        for node in self.graph.registered() {
            match node.category() {
                NodeCategory::Point => summary.points += 1,
                NodeCategory::Line => summary.lines += 1,
                NodeCategory::Segment => summary.segments += 1,
                NodeCategory::Circle => summary.circles += 1,
                NodeCategory::Label => summary.labels += 1,
                NodeCategory::Expression => summary.measurements += 1,
            }
        }
        summary.edges = self.graph.edge_count();
        summary
    }

    /// 为 CLI / 快速验证填充一组示例对象。
    pub fn populate_demo(&mut self) -> Result<DemoObjects, EngineError> {
        let north = self.add_free_point(Vector3::new(0.0, 0.0, 1.0))?;
        let east = self.add_free_point(Vector3::new(1.0, 0.0, 0.0))?;
        let south_east = self.add_free_point(Vector3::new(0.0, 1.0, -1.0))?;
        let rim = self.add_free_point(Vector3::new(1.0, 1.0, 1.0))?;

        let meridian = self.add_line(north, east)?;
        let segment = self.add_segment(east, south_east)?;
        let circle = self.add_circle(north, rim)?;
        let pole = self.add_polar_point(meridian, 0)?;
        let length = self.add_segment_length(segment)?;

        let ids = DemoObjects {
            north,
            east,
            south_east,
            rim,
            meridian,
            segment,
            circle,
            pole,
            length,
        };
        debug!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "已创建演示对象"
        );
        Ok(ids)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneSummary {
    pub points: usize,
    pub lines: usize,
    pub segments: usize,
    pub circles: usize,
    pub labels: usize,
    pub measurements: usize,
    pub edges: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_population_creates_objects() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().expect("populate demo");
        let summary = scene.summary();
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.segments, 1);
        assert_eq!(summary.circles, 1);
        assert_eq!(summary.measurements, 1);
        assert!(summary.points >= 5);
        assert!(scene.graph().node(ids.pole).unwrap().exists());
        // 极点 = 北极 × 东 = +y
        let pole = scene.graph().node(ids.pole).unwrap().location().unwrap();
        assert!(pole.near(Vector3::new(0.0, 1.0, 0.0)));
    }

    #[test]
    fn undo_all_empties_the_scene() {
        let mut scene = Scene::new();
        scene.populate_demo().unwrap();
        while scene.undo().unwrap() {}
        assert_eq!(scene.graph().node_count(), 0);
        assert_eq!(scene.graph().edge_count(), 0);
        while scene.redo().unwrap() {}
        assert_eq!(scene.summary().circles, 1);
    }

    #[test]
    fn explicit_intersection_converts_hidden_one() {
        let mut scene = Scene::new();
        let a = scene.add_free_point(Vector3::new(0.0, 0.0, 1.0)).unwrap();
        let b = scene.add_free_point(Vector3::new(1.0, 0.0, 0.0)).unwrap();
        let c = scene.add_free_point(Vector3::new(0.0, 1.0, 0.0)).unwrap();
        let d = scene.add_free_point(Vector3::new(1.0, 1.0, 0.0)).unwrap();
        let first = scene.add_line(a, b).unwrap();
        let second = scene.add_line(c, d).unwrap();
        let hidden = scene.graph().points().len();

        let point = scene.add_intersection_point(second, first, 0).unwrap();
        assert_eq!(scene.graph().points().len(), hidden);
        assert!(scene.graph().node(point).unwrap().showing());
        scene.undo().unwrap();
        assert!(!scene.graph().node(point).unwrap().showing());
    }

    #[test]
    fn only_intersection_points_convert() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().unwrap();
        assert!(matches!(
            scene.convert_to_user_created(ids.north),
            Err(EngineError::WrongKind { .. })
        ));
        let hidden = scene
            .graph()
            .points()
            .iter()
            .copied()
            .find(|id| !scene.graph().node(*id).unwrap().showing())
            .expect("discovered intersection");
        let done = scene.log().done().len();
        scene.convert_to_user_created(hidden).unwrap();
        assert!(scene.graph().node(hidden).unwrap().showing());
        // 第二次转换不产生新命令
        scene.convert_to_user_created(hidden).unwrap();
        assert_eq!(scene.log().done().len(), done + 1);
    }

    #[test]
    fn moving_a_constrained_point_is_rejected() {
        let mut scene = Scene::new();
        let ids = scene.populate_demo().unwrap();
        assert!(matches!(
            scene.move_point(ids.pole, Vector3::new(1.0, 0.0, 0.0)),
            Err(EngineError::NotMovable(_))
        ));
        assert!(matches!(
            scene.add_free_point(Vector3::ZERO),
            Err(EngineError::DegenerateVector)
        ));
    }
}
