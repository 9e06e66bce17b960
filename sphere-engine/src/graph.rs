//! 几何对象依赖图与更新引擎。
//!
//! 所有对象存放在一个只增不减的 arena 中，以 [`NodeId`] 互相引用：
//! `parents` 在创建时确定且不再改变，`children` 只通过注册/注销成对维护。
//! 对象是否“在图中”由各类索引（点、线、线段、圆、标签、度量）决定，
//! 撤销删除时只需把 arena 中的对象重新挂回索引与边。

use std::collections::HashMap;
use std::fmt;

use sphere_core::arc::{SegmentArc, normal_through};
use sphere_core::geometry::Vector3;
use sphere_core::intersection::{
    CircleShape, CurveKind, LineShape, OneDimensional, SegmentShape, intersect,
};
use sphere_core::settings::GeometrySettings;
use sphere_core::style::{NodeStyle, StyleOptions, StylePanel, StyleTarget};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// 提供原始数值，便于日志输出。
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateAxis {
    X,
    Y,
    Z,
}

impl CoordinateAxis {
    pub fn as_str(self) -> &'static str {
        match self {
            CoordinateAxis::X => "x",
            CoordinateAxis::Y => "y",
            CoordinateAxis::Z => "z",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "x" => Some(CoordinateAxis::X),
            "y" => Some(CoordinateAxis::Y),
            "z" => Some(CoordinateAxis::Z),
            _ => None,
        }
    }

    #[inline]
    pub fn select(self, vector: Vector3) -> f64 {
        match self {
            CoordinateAxis::X => vector.x(),
            CoordinateAxis::Y => vector.y(),
            CoordinateAxis::Z => vector.z(),
        }
    }
}

/// 对象种类及其缓存的派生几何量。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    FreePoint {
        location: Vector3,
    },
    /// 两个一维对象的第 `order` 个交点，`parent1`/`parent2` 已按规范顺序排列。
    IntersectionPoint {
        location: Vector3,
        parent1: NodeId,
        parent2: NodeId,
        order: usize,
        is_user_created: bool,
    },
    /// 直线或线段的极点：`index` 为 0 取法向量，为 1 取其反向。
    PolarPoint {
        location: Vector3,
        parent: NodeId,
        index: usize,
    },
    Line {
        start: NodeId,
        end: NodeId,
        normal: Vector3,
    },
    Segment {
        start: NodeId,
        end: NodeId,
        arc: SegmentArc,
    },
    Circle {
        center: NodeId,
        circle_point: NodeId,
        radius: f64,
    },
    Label {
        parent: NodeId,
        location: Vector3,
    },
    PointCoordinate {
        point: NodeId,
        axis: CoordinateAxis,
        value: f64,
    },
    SegmentLength {
        segment: NodeId,
        value: f64,
    },
}

impl NodeKind {
    pub fn category(&self) -> NodeCategory {
        match self {
            NodeKind::FreePoint { .. }
            | NodeKind::IntersectionPoint { .. }
            | NodeKind::PolarPoint { .. } => NodeCategory::Point,
            NodeKind::Line { .. } => NodeCategory::Line,
            NodeKind::Segment { .. } => NodeCategory::Segment,
            NodeKind::Circle { .. } => NodeCategory::Circle,
            NodeKind::Label { .. } => NodeCategory::Label,
            NodeKind::PointCoordinate { .. } | NodeKind::SegmentLength { .. } => {
                NodeCategory::Expression
            }
        }
    }

    pub fn curve_kind(&self) -> Option<CurveKind> {
        match self {
            NodeKind::Line { .. } => Some(CurveKind::Line),
            NodeKind::Segment { .. } => Some(CurveKind::Segment),
            NodeKind::Circle { .. } => Some(CurveKind::Circle),
            _ => None,
        }
    }

    #[inline]
    pub fn is_point(&self) -> bool {
        self.category() == NodeCategory::Point
    }

    fn style_target(&self) -> StyleTarget {
        match self.category() {
            NodeCategory::Point => StyleTarget::Point,
            NodeCategory::Label => StyleTarget::Label,
            _ => StyleTarget::Curve,
        }
    }
}

/// 对象所属的索引。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    Point,
    Line,
    Segment,
    Circle,
    Label,
    Expression,
}

impl NodeCategory {
    pub fn describe(self) -> &'static str {
        match self {
            NodeCategory::Point => "point",
            NodeCategory::Line => "line",
            NodeCategory::Segment => "segment",
            NodeCategory::Circle => "circle",
            NodeCategory::Label => "label",
            NodeCategory::Expression => "measurement",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    exists: bool,
    showing: bool,
    out_of_date: bool,
    in_graph: bool,
    parents: Vec<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
    style: NodeStyle,
    marked_in: u64,
}

impl Node {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 本帧几何上是否有定义（例如两圆是否相交）。
    #[inline]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// 用户可见性开关，与 `exists` 相互独立。
    #[inline]
    pub fn showing(&self) -> bool {
        self.showing
    }

    #[inline]
    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }

    #[inline]
    pub fn in_graph(&self) -> bool {
        self.in_graph
    }

    #[inline]
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn category(&self) -> NodeCategory {
        self.kind.category()
    }

    #[inline]
    pub fn style(&self) -> &NodeStyle {
        &self.style
    }

    /// 点与标签的位置向量。
    pub fn location(&self) -> Option<Vector3> {
        match self.kind {
            NodeKind::FreePoint { location }
            | NodeKind::IntersectionPoint { location, .. }
            | NodeKind::PolarPoint { location, .. }
            | NodeKind::Label { location, .. } => Some(location),
            _ => None,
        }
    }

    /// 度量对象的当前数值。
    pub fn value(&self) -> Option<f64> {
        match self.kind {
            NodeKind::PointCoordinate { value, .. } | NodeKind::SegmentLength { value, .. } => {
                Some(value)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// 只重新计算几何。
    DisplayOnly,
    /// 额外记录更新前的状态，供撤销移动使用。
    RecordStateForMove,
    /// 额外记录更新前的状态，供撤销删除使用。
    RecordStateForDelete,
}

impl UpdateMode {
    #[inline]
    pub fn records(self) -> bool {
        !matches!(self, UpdateMode::DisplayOnly)
    }
}

/// 对象更新前的标量状态。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Snapshot {
    Location(Vector3),
    LineNormal(Vector3),
    Segment(SegmentArc),
    Radius(f64),
    Value(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectState {
    pub id: NodeId,
    pub snapshot: Snapshot,
}

/// 一次更新传播的模式与（可选的）状态记录列表。
#[derive(Debug, Clone)]
pub struct UpdateState {
    pub mode: UpdateMode,
    pub states: Vec<ObjectState>,
}

impl UpdateState {
    pub fn display_only() -> Self {
        Self {
            mode: UpdateMode::DisplayOnly,
            states: Vec::new(),
        }
    }

    pub fn record(mode: UpdateMode) -> Self {
        Self {
            mode,
            states: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct NameCounters {
    points: usize,
    lines: usize,
    segments: usize,
    circles: usize,
    labels: usize,
    expressions: usize,
}

/// 几何对象依赖图。
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    points: Vec<NodeId>,
    lines: Vec<NodeId>,
    segments: Vec<NodeId>,
    circles: Vec<NodeId>,
    labels: Vec<NodeId>,
    expressions: Vec<NodeId>,
    names: HashMap<String, NodeId>,
    counters: NameCounters,
    /// 最近一次过期标记的序号，与 `Node::marked_in` 配合避免重复展开。
    mark_pass: u64,
    settings: GeometrySettings,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(GeometrySettings::default())
    }
}

impl Graph {
    pub fn new(settings: GeometrySettings) -> Self {
        Self {
            nodes: Vec::new(),
            points: Vec::new(),
            lines: Vec::new(),
            segments: Vec::new(),
            circles: Vec::new(),
            labels: Vec::new(),
            expressions: Vec::new(),
            names: HashMap::new(),
            counters: NameCounters::default(),
            mark_pass: 0,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &GeometrySettings {
        &self.settings
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub(crate) fn require(&self, id: NodeId) -> Result<&Node, EngineError> {
        self.nodes.get(id.0).ok_or(EngineError::NodeNotFound(id.0))
    }

    fn require_mut(&mut self, id: NodeId) -> Result<&mut Node, EngineError> {
        self.nodes.get_mut(id.0).ok_or(EngineError::NodeNotFound(id.0))
    }

    /// 按名称查找 arena 中的对象（包括暂未挂入图中的对象）。
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: NodeId) -> Result<&str, EngineError> {
        Ok(self.require(id)?.name())
    }

    #[inline]
    pub fn points(&self) -> &[NodeId] {
        &self.points
    }

    #[inline]
    pub fn lines(&self) -> &[NodeId] {
        &self.lines
    }

    #[inline]
    pub fn segments(&self) -> &[NodeId] {
        &self.segments
    }

    #[inline]
    pub fn circles(&self) -> &[NodeId] {
        &self.circles
    }

    #[inline]
    pub fn labels(&self) -> &[NodeId] {
        &self.labels
    }

    #[inline]
    pub fn expressions(&self) -> &[NodeId] {
        &self.expressions
    }

    /// 图中（已挂入索引）的对象。
    pub fn registered(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.in_graph)
    }

    pub fn node_count(&self) -> usize {
        self.registered().count()
    }

    pub fn edge_count(&self) -> usize {
        self.registered().map(|node| node.children.len()).sum()
    }

    // ---------------------------------------------------------------------
    // 创建对象：只分配 arena 槽位并计算初始几何，不挂入图中
    // ---------------------------------------------------------------------

    pub fn create_free_point(&mut self, location: Vector3) -> NodeId {
        let name = self.next_name(NodeCategory::Point);
        self.allocate(NodeKind::FreePoint { location }, Vec::new(), name)
    }

    pub fn create_line(&mut self, start: NodeId, end: NodeId) -> Result<NodeId, EngineError> {
        self.expect_point(start)?;
        self.expect_point(end)?;
        let name = self.next_name(NodeCategory::Line);
        let kind = NodeKind::Line {
            start,
            end,
            normal: Vector3::ZERO,
        };
        Ok(self.allocate(kind, vec![start, end], name))
    }

    /// 新线段默认取两端点之间的短弧。
    pub fn create_segment(&mut self, start: NodeId, end: NodeId) -> Result<NodeId, EngineError> {
        self.expect_point(start)?;
        self.expect_point(end)?;
        let name = self.next_name(NodeCategory::Segment);
        let kind = NodeKind::Segment {
            start,
            end,
            arc: SegmentArc::new(Vector3::ZERO, 0.0),
        };
        Ok(self.allocate(kind, vec![start, end], name))
    }

    pub fn create_circle(
        &mut self,
        center: NodeId,
        circle_point: NodeId,
    ) -> Result<NodeId, EngineError> {
        self.expect_point(center)?;
        self.expect_point(circle_point)?;
        let name = self.next_name(NodeCategory::Circle);
        let kind = NodeKind::Circle {
            center,
            circle_point,
            radius: 0.0,
        };
        Ok(self.allocate(kind, vec![center, circle_point], name))
    }

    /// 创建交点；两个父对象会先按规范顺序排列。
    pub fn create_intersection_point(
        &mut self,
        first: NodeId,
        second: NodeId,
        order: usize,
        is_user_created: bool,
    ) -> Result<NodeId, EngineError> {
        if order > 1 {
            return Err(EngineError::InvalidOrdinal(order));
        }
        let (parent1, parent2) = self.canonical_pair(first, second)?;
        let base = format!(
            "Intersection({},{},{})",
            self.name_of(parent1)?,
            self.name_of(parent2)?,
            order
        );
        let name = self.unique_name(base);
        let kind = NodeKind::IntersectionPoint {
            location: Vector3::ZERO,
            parent1,
            parent2,
            order,
            is_user_created,
        };
        let id = self.allocate(kind, vec![parent1, parent2], name);
        let node = &mut self.nodes[id.0];
        node.showing = is_user_created;
        if !is_user_created {
            node.style = NodeStyle::reduced_glow_point();
        }
        Ok(id)
    }

    pub fn create_polar_point(&mut self, parent: NodeId, index: usize) -> Result<NodeId, EngineError> {
        if index > 1 {
            return Err(EngineError::InvalidOrdinal(index));
        }
        match self.require(parent)?.kind.curve_kind() {
            Some(CurveKind::Line) | Some(CurveKind::Segment) => {}
            _ => return Err(self.wrong_kind(parent, "line or segment")),
        }
        let name = self.next_name(NodeCategory::Point);
        let kind = NodeKind::PolarPoint {
            location: Vector3::ZERO,
            parent,
            index,
        };
        Ok(self.allocate(kind, vec![parent], name))
    }

    /// 为点或一维对象创建标签，初始位置取父对象上的代表点。
    pub fn create_label(&mut self, parent: NodeId) -> Result<NodeId, EngineError> {
        let location = match self.require(parent)?.kind {
            // 与法向量垂直的任一方向都落在直线上
            NodeKind::Line { normal, .. } => normal_through(normal, normal, Vector3::ZERO),
            NodeKind::Segment { start, arc, .. } => {
                SegmentShape::new(self.location_of(start), arc.normal, arc.arc_length).midpoint()
            }
            NodeKind::Circle { circle_point, .. } => self.location_of(circle_point),
            ref kind if kind.is_point() => self.location_of(parent),
            _ => return Err(self.wrong_kind(parent, "point, line, segment or circle")),
        };
        let name = self.next_name(NodeCategory::Label);
        Ok(self.allocate(NodeKind::Label { parent, location }, vec![parent], name))
    }

    pub fn create_point_coordinate(
        &mut self,
        point: NodeId,
        axis: CoordinateAxis,
    ) -> Result<NodeId, EngineError> {
        self.expect_point(point)?;
        let name = self.next_name(NodeCategory::Expression);
        let kind = NodeKind::PointCoordinate {
            point,
            axis,
            value: 0.0,
        };
        Ok(self.allocate(kind, vec![point], name))
    }

    pub fn create_segment_length(&mut self, segment: NodeId) -> Result<NodeId, EngineError> {
        if self.require(segment)?.kind.curve_kind() != Some(CurveKind::Segment) {
            return Err(self.wrong_kind(segment, "segment"));
        }
        let name = self.next_name(NodeCategory::Expression);
        let kind = NodeKind::SegmentLength { segment, value: 0.0 };
        Ok(self.allocate(kind, vec![segment], name))
    }

    fn allocate(&mut self, kind: NodeKind, parents: Vec<NodeId>, name: String) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.names.insert(name.clone(), id);
        self.nodes.push(Node {
            id,
            name,
            exists: true,
            showing: true,
            out_of_date: true,
            in_graph: false,
            parents,
            children: Vec::new(),
            kind,
            style: NodeStyle::default_for(kind.style_target()),
            marked_in: 0,
        });
        self.recompute(id);
        self.nodes[id.0].out_of_date = false;
        id
    }

    fn next_name(&mut self, category: NodeCategory) -> String {
        loop {
            let (counter, prefix) = match category {
                NodeCategory::Point => (&mut self.counters.points, "P"),
                NodeCategory::Line => (&mut self.counters.lines, "Li-"),
                NodeCategory::Segment => (&mut self.counters.segments, "Ls-"),
                NodeCategory::Circle => (&mut self.counters.circles, "C"),
                NodeCategory::Label => (&mut self.counters.labels, "Lb-"),
                NodeCategory::Expression => (&mut self.counters.expressions, "M"),
            };
            *counter += 1;
            let candidate = format!("{prefix}{counter}");
            if !self.names.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn unique_name(&self, base: String) -> String {
        if !self.names.contains_key(&base) {
            return base;
        }
        (2..)
            .map(|suffix| format!("{base}-{suffix}"))
            .find(|candidate| !self.names.contains_key(candidate))
            .unwrap_or(base)
    }

    /// 重命名对象。名称已被其它对象占用时返回错误。
    pub fn rename(&mut self, id: NodeId, name: &str) -> Result<(), EngineError> {
        match self.names.get(name) {
            Some(existing) if *existing == id => return Ok(()),
            Some(_) => return Err(EngineError::DuplicateName(name.to_string())),
            None => {}
        }
        let node = self.require_mut(id)?;
        let old = std::mem::replace(&mut node.name, name.to_string());
        self.names.remove(&old);
        self.names.insert(name.to_string(), id);
        Ok(())
    }

    /// 已分配的对象总数，包括不在图中的对象。
    pub(crate) fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// 释放从 `first` 起分配的对象所占用的名称。对象本身留在 arena 中。
    pub(crate) fn release_names_since(&mut self, first: usize) {
        for node in self.nodes.iter().skip(first) {
            if self.names.get(&node.name) == Some(&node.id) {
                self.names.remove(&node.name);
            }
        }
    }

    fn expect_point(&self, id: NodeId) -> Result<(), EngineError> {
        if self.require(id)?.kind.is_point() {
            Ok(())
        } else {
            Err(self.wrong_kind(id, "point"))
        }
    }

    pub(crate) fn wrong_kind(&self, id: NodeId, expected: &'static str) -> EngineError {
        EngineError::WrongKind {
            name: self
                .node(id)
                .map(|node| node.name.clone())
                .unwrap_or_else(|| id.to_string()),
            expected,
        }
    }

    // ---------------------------------------------------------------------
    // 边与索引维护
    // ---------------------------------------------------------------------

    /// 在 `parent` 的子列表末尾登记 `child`。重复登记无效果。
    pub fn register_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), EngineError> {
        self.require(child)?;
        let node = self.require_mut(parent)?;
        if !node.children.contains(&child) {
            node.children.push(child);
        }
        Ok(())
    }

    /// 注销子对象，返回其原先在子列表中的位置。
    pub fn unregister_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
    ) -> Result<Option<usize>, EngineError> {
        let node = self.require_mut(parent)?;
        let position = node.children.iter().position(|kid| *kid == child);
        if let Some(position) = position {
            node.children.remove(position);
        }
        Ok(position)
    }

    pub(crate) fn insert_child_at(&mut self, parent: NodeId, child: NodeId, position: usize) {
        let children = &mut self.nodes[parent.0].children;
        if !children.contains(&child) {
            let position = position.min(children.len());
            children.insert(position, child);
        }
    }

    fn index_mut(&mut self, category: NodeCategory) -> &mut Vec<NodeId> {
        match category {
            NodeCategory::Point => &mut self.points,
            NodeCategory::Line => &mut self.lines,
            NodeCategory::Segment => &mut self.segments,
            NodeCategory::Circle => &mut self.circles,
            NodeCategory::Label => &mut self.labels,
            NodeCategory::Expression => &mut self.expressions,
        }
    }

    /// 挂入所属索引；`position` 为 `None` 时追加到末尾。
    pub(crate) fn insert_into_index(
        &mut self,
        id: NodeId,
        position: Option<usize>,
    ) -> Result<(), EngineError> {
        let node = self.require_mut(id)?;
        if node.in_graph {
            return Ok(());
        }
        node.in_graph = true;
        let category = node.category();
        let index = self.index_mut(category);
        let position = position.unwrap_or(index.len()).min(index.len());
        index.insert(position, id);
        Ok(())
    }

    /// 从所属索引移除，返回原位置。
    pub(crate) fn remove_from_index(&mut self, id: NodeId) -> Result<Option<usize>, EngineError> {
        let node = self.require_mut(id)?;
        node.in_graph = false;
        let category = node.category();
        let index = self.index_mut(category);
        let position = index.iter().position(|existing| *existing == id);
        if let Some(position) = position {
            index.remove(position);
        }
        Ok(position)
    }

    fn add_to(&mut self, id: NodeId, category: NodeCategory) -> Result<(), EngineError> {
        if self.require(id)?.category() != category {
            return Err(self.wrong_kind(id, category.describe()));
        }
        self.insert_into_index(id, None)
    }

    fn remove_from(&mut self, id: NodeId, category: NodeCategory) -> Result<bool, EngineError> {
        if self.require(id)?.category() != category {
            return Err(self.wrong_kind(id, category.describe()));
        }
        Ok(self.remove_from_index(id)?.is_some())
    }

    pub fn add_point(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.add_to(id, NodeCategory::Point)
    }

    pub fn remove_point(&mut self, id: NodeId) -> Result<bool, EngineError> {
        self.remove_from(id, NodeCategory::Point)
    }

    pub fn add_line(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.add_to(id, NodeCategory::Line)
    }

    pub fn remove_line(&mut self, id: NodeId) -> Result<bool, EngineError> {
        self.remove_from(id, NodeCategory::Line)
    }

    pub fn add_segment(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.add_to(id, NodeCategory::Segment)
    }

    pub fn remove_segment(&mut self, id: NodeId) -> Result<bool, EngineError> {
        self.remove_from(id, NodeCategory::Segment)
    }

    pub fn add_circle(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.add_to(id, NodeCategory::Circle)
    }

    pub fn remove_circle(&mut self, id: NodeId) -> Result<bool, EngineError> {
        self.remove_from(id, NodeCategory::Circle)
    }

    pub fn add_label(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.add_to(id, NodeCategory::Label)
    }

    pub fn remove_label(&mut self, id: NodeId) -> Result<bool, EngineError> {
        self.remove_from(id, NodeCategory::Label)
    }

    pub fn add_expression(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.add_to(id, NodeCategory::Expression)
    }

    pub fn remove_expression(&mut self, id: NodeId) -> Result<bool, EngineError> {
        self.remove_from(id, NodeCategory::Expression)
    }

    /// 向所有父对象登记并挂入索引。
    pub(crate) fn attach(&mut self, id: NodeId) -> Result<(), EngineError> {
        let parents = self.require(id)?.parents.clone();
        for parent in parents {
            self.register_child(parent, id)?;
        }
        self.insert_into_index(id, None)
    }

    /// [`Graph::attach`] 的逆操作。
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.remove_from_index(id)?;
        let parents = self.require(id)?.parents.clone();
        for parent in parents.into_iter().rev() {
            self.unregister_child(parent, id)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // 属性修改（由命令调用）
    // ---------------------------------------------------------------------

    pub(crate) fn set_showing(&mut self, id: NodeId, showing: bool) -> Result<(), EngineError> {
        self.require_mut(id)?.showing = showing;
        Ok(())
    }

    pub(crate) fn set_exists(&mut self, id: NodeId, exists: bool) -> Result<(), EngineError> {
        self.require_mut(id)?.exists = exists;
        Ok(())
    }

    pub(crate) fn set_style_panel(
        &mut self,
        id: NodeId,
        panel: StylePanel,
        options: &StyleOptions,
    ) -> Result<(), EngineError> {
        let style = self.require_mut(id)?.style.panel_mut(panel);
        style.clone_from(options);
        style.panel = panel;
        Ok(())
    }

    pub(crate) fn set_style(&mut self, id: NodeId, style: NodeStyle) -> Result<(), EngineError> {
        self.require_mut(id)?.style = style;
        Ok(())
    }

    pub(crate) fn set_user_created(&mut self, id: NodeId, flag: bool) -> Result<(), EngineError> {
        match &mut self.require_mut(id)?.kind {
            NodeKind::IntersectionPoint {
                is_user_created, ..
            } => {
                *is_user_created = flag;
                Ok(())
            }
            _ => Err(self.wrong_kind(id, "intersection point")),
        }
    }

    /// 直接写入位置向量（点、标签）。自由点之外的对象会在下一次更新时被覆盖。
    pub(crate) fn set_location(&mut self, id: NodeId, vector: Vector3) -> Result<(), EngineError> {
        match &mut self.require_mut(id)?.kind {
            NodeKind::FreePoint { location }
            | NodeKind::IntersectionPoint { location, .. }
            | NodeKind::PolarPoint { location, .. }
            | NodeKind::Label { location, .. } => {
                *location = vector;
                Ok(())
            }
            _ => Err(self.wrong_kind(id, "point or label")),
        }
    }

    pub(crate) fn set_line_normal(&mut self, id: NodeId, vector: Vector3) -> Result<(), EngineError> {
        match &mut self.require_mut(id)?.kind {
            NodeKind::Line { normal, .. } => {
                *normal = vector;
                Ok(())
            }
            _ => Err(self.wrong_kind(id, "line")),
        }
    }

    pub(crate) fn set_segment_arc(&mut self, id: NodeId, value: SegmentArc) -> Result<(), EngineError> {
        match &mut self.require_mut(id)?.kind {
            NodeKind::Segment { arc, .. } => {
                *arc = value;
                Ok(())
            }
            _ => Err(self.wrong_kind(id, "segment")),
        }
    }

    /// 移动自由点。只写入位置，传播由调用方驱动。
    pub fn set_point_location(&mut self, id: NodeId, vector: Vector3) -> Result<(), EngineError> {
        match &mut self.require_mut(id)?.kind {
            NodeKind::FreePoint { location } => {
                *location = vector;
                Ok(())
            }
            _ => Err(EngineError::NotMovable(self.name_of(id)?.to_string())),
        }
    }

    /// 恢复 [`UpdateMode::RecordStateForMove`] 等模式记录的状态，种类不匹配时忽略。
    pub fn restore_object_state(&mut self, state: &ObjectState) {
        let Some(node) = self.nodes.get_mut(state.id.0) else {
            return;
        };
        match (&mut node.kind, state.snapshot) {
            (
                NodeKind::FreePoint { location }
                | NodeKind::IntersectionPoint { location, .. }
                | NodeKind::PolarPoint { location, .. }
                | NodeKind::Label { location, .. },
                Snapshot::Location(saved),
            ) => *location = saved,
            (NodeKind::Line { normal, .. }, Snapshot::LineNormal(saved)) => *normal = saved,
            (NodeKind::Segment { arc, .. }, Snapshot::Segment(saved)) => *arc = saved,
            (NodeKind::Circle { radius, .. }, Snapshot::Radius(saved)) => *radius = saved,
            (
                NodeKind::PointCoordinate { value, .. } | NodeKind::SegmentLength { value, .. },
                Snapshot::Value(saved),
            ) => *value = saved,
            _ => {}
        }
    }

    fn snapshot(&self, id: NodeId) -> ObjectState {
        let snapshot = match self.nodes[id.0].kind {
            NodeKind::FreePoint { location }
            | NodeKind::IntersectionPoint { location, .. }
            | NodeKind::PolarPoint { location, .. }
            | NodeKind::Label { location, .. } => Snapshot::Location(location),
            NodeKind::Line { normal, .. } => Snapshot::LineNormal(normal),
            NodeKind::Segment { arc, .. } => Snapshot::Segment(arc),
            NodeKind::Circle { radius, .. } => Snapshot::Radius(radius),
            NodeKind::PointCoordinate { value, .. } | NodeKind::SegmentLength { value, .. } => {
                Snapshot::Value(value)
            }
        };
        ObjectState { id, snapshot }
    }

    // ---------------------------------------------------------------------
    // 更新引擎
    // ---------------------------------------------------------------------

    /// 把 `id` 及其所有后代标记为过期。每个对象在同一次标记中只展开一次，
    /// 已过期的后代同样会继续向下标记。
    pub fn mark_kids_out_of_date(&mut self, id: NodeId) {
        self.mark_pass += 1;
        let pass = self.mark_pass;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current.0) else {
                continue;
            };
            if node.marked_in == pass {
                continue;
            }
            node.marked_in = pass;
            node.out_of_date = true;
            stack.extend(node.children.iter().copied());
        }
    }

    /// 所有父对象均已更新时返回 true。
    pub fn can_update_now(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|node| {
            node.parents
                .iter()
                .all(|parent| !self.nodes[parent.0].out_of_date)
        })
    }

    /// 更新 `id` 并按子列表顺序向下传播。
    ///
    /// 父对象尚未更新时直接返回，等父对象更新后再经由传播回到这里。
    /// 传播只进入仍处于过期状态的子对象，因此在一次传播中每个对象最多更新一次。
    pub fn update(&mut self, id: NodeId, state: &mut UpdateState) {
        if !self.can_update_now(id) {
            return;
        }
        self.process(id, state);
    }

    fn process(&mut self, id: NodeId, state: &mut UpdateState) {
        self.nodes[id.0].out_of_date = false;
        if state.mode.records() {
            state.states.push(self.snapshot(id));
        }
        self.recompute(id);

        let children = self.nodes[id.0].children.clone();
        for child in children {
            if self.nodes[child.0].out_of_date && self.can_update_now(child) {
                self.process(child, state);
            }
        }
    }

    /// 根据父对象重新计算 `exists` 与派生几何量。父对象不存在时跳过几何计算。
    fn recompute(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        let parents_exist = node.parents.iter().all(|parent| self.nodes[parent.0].exists);
        let mut kind = node.kind;
        let mut exists = parents_exist;

        if parents_exist {
            match &mut kind {
                NodeKind::FreePoint { .. } => {}
                NodeKind::IntersectionPoint {
                    location,
                    parent1,
                    parent2,
                    order,
                    ..
                } => {
                    let results = self
                        .shape_of(*parent1)
                        .zip(self.shape_of(*parent2))
                        .and_then(|(first, second)| intersect(&first, &second));
                    match results {
                        Some(results) => {
                            exists = results[*order].exists;
                            *location = results[*order].vector;
                        }
                        None => exists = false,
                    }
                }
                NodeKind::PolarPoint {
                    location,
                    parent,
                    index,
                } => {
                    let normal = match self.nodes[parent.0].kind {
                        NodeKind::Line { normal, .. } => normal,
                        NodeKind::Segment { arc, .. } => arc.normal,
                        _ => Vector3::ZERO,
                    };
                    *location = if *index == 0 { normal } else { -normal };
                }
                NodeKind::Line { start, end, normal } => {
                    *normal = normal_through(self.location_of(*start), self.location_of(*end), *normal);
                }
                NodeKind::Segment { start, end, arc } => {
                    *arc = arc.advance(
                        self.location_of(*start),
                        self.location_of(*end),
                        &self.settings,
                    );
                }
                NodeKind::Circle {
                    center,
                    circle_point,
                    radius,
                } => {
                    *radius = self
                        .location_of(*center)
                        .angle_to(self.location_of(*circle_point));
                }
                NodeKind::Label { parent, location } => {
                    if self.nodes[parent.0].kind.is_point() {
                        *location = self.location_of(*parent);
                    }
                }
                NodeKind::PointCoordinate { point, axis, value } => {
                    *value = axis.select(self.location_of(*point));
                }
                NodeKind::SegmentLength { segment, value } => {
                    if let NodeKind::Segment { arc, .. } = self.nodes[segment.0].kind {
                        *value = arc.arc_length;
                    }
                }
            }
        }

        let node = &mut self.nodes[id.0];
        node.kind = kind;
        node.exists = exists;
    }

    #[inline]
    pub(crate) fn location_of(&self, id: NodeId) -> Vector3 {
        self.node(id)
            .and_then(Node::location)
            .unwrap_or(Vector3::ZERO)
    }

    /// 一维对象当前的几何形状。
    pub fn shape_of(&self, id: NodeId) -> Option<OneDimensional> {
        match self.node(id)?.kind {
            NodeKind::Line { normal, .. } => Some(OneDimensional::Line(LineShape::new(normal))),
            NodeKind::Segment { start, arc, .. } => Some(OneDimensional::Segment(SegmentShape::new(
                self.location_of(start),
                arc.normal,
                arc.arc_length,
            ))),
            NodeKind::Circle { center, radius, .. } => Some(OneDimensional::Circle(
                CircleShape::new(self.location_of(center), radius),
            )),
            _ => None,
        }
    }

    /// 按规范顺序（种类，再按名称）排列两个一维对象。
    pub fn canonical_pair(
        &self,
        first: NodeId,
        second: NodeId,
    ) -> Result<(NodeId, NodeId), EngineError> {
        let key = |id: NodeId| -> Result<(CurveKind, &str), EngineError> {
            let node = self.require(id)?;
            node.kind
                .curve_kind()
                .map(|kind| (kind, node.name()))
                .ok_or_else(|| EngineError::NotOneDimensional(node.name().to_string()))
        };
        if key(first)? <= key(second)? {
            Ok((first, second))
        } else {
            Ok((second, first))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z).normalize_or_zero()
    }

    fn attach_all(graph: &mut Graph, ids: &[NodeId]) {
        for id in ids {
            graph.attach(*id).expect("attach node");
        }
    }

    #[test]
    fn chain_updates_in_one_pass() {
        let mut graph = Graph::default();
        let a = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let b = graph.create_free_point(unit(1.0, 0.0, 0.0));
        let line = graph.create_line(a, b).unwrap();
        let pole = graph.create_polar_point(line, 0).unwrap();
        let coordinate = graph.create_point_coordinate(pole, CoordinateAxis::Y).unwrap();
        attach_all(&mut graph, &[a, b, line, pole, coordinate]);

        // 人为制造陈旧状态
        graph.nodes[pole.0].out_of_date = true;
        graph.set_point_location(b, unit(0.0, 1.0, 0.0)).unwrap();
        graph.mark_kids_out_of_date(b);
        graph.update(b, &mut UpdateState::display_only());

        for id in [b, line, pole, coordinate] {
            assert!(!graph.node(id).unwrap().is_out_of_date());
        }
        // z × y = -x
        assert!(graph.node(pole).unwrap().location().unwrap().near(unit(-1.0, 0.0, 0.0)));
        assert!(graph.node(coordinate).unwrap().value().unwrap().abs() < 1e-12);
    }

    #[test]
    fn diamond_child_waits_for_both_parents() {
        let mut graph = Graph::default();
        let center = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let rim = graph.create_free_point(unit(1.0, 0.0, 1.0));
        let circle = graph.create_circle(center, rim).unwrap();
        let segment = graph.create_segment(center, rim).unwrap();
        let length = graph.create_segment_length(segment).unwrap();
        attach_all(&mut graph, &[center, rim, circle, segment, length]);

        let mut state = UpdateState::record(UpdateMode::RecordStateForMove);
        graph.set_point_location(rim, unit(1.0, 0.0, 0.0)).unwrap();
        graph.mark_kids_out_of_date(rim);
        graph.update(rim, &mut state);

        // 每个后代只记录一次
        let mut seen: Vec<_> = state.states.iter().map(|s| s.id).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert!((graph.node(length).unwrap().value().unwrap() - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        match graph.node(circle).unwrap().kind() {
            NodeKind::Circle { radius, .. } => {
                assert!((radius - std::f64::consts::FRAC_PI_2).abs() < 1e-12)
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn repeated_marking_reaches_every_descendant() {
        let mut graph = Graph::default();
        let center = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let rim = graph.create_free_point(unit(1.0, 0.0, 1.0));
        let segment = graph.create_segment(center, rim).unwrap();
        let length = graph.create_segment_length(segment).unwrap();
        attach_all(&mut graph, &[center, rim, segment, length]);

        for _ in 0..2 {
            graph.mark_kids_out_of_date(center);
            for id in [center, segment, length] {
                assert!(graph.node(id).unwrap().is_out_of_date());
            }
            assert!(!graph.node(rim).unwrap().is_out_of_date());
            graph.update(center, &mut UpdateState::display_only());
            assert!(!graph.node(length).unwrap().is_out_of_date());
        }
    }

    #[test]
    fn non_existence_propagates_without_panicking() {
        let mut graph = Graph::default();
        let a = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let b = graph.create_free_point(unit(1.0, 0.0, 0.0));
        let c = graph.create_free_point(unit(0.0, 1.0, 0.0));
        let first = graph.create_line(a, b).unwrap();
        let second = graph.create_line(a, c).unwrap();
        attach_all(&mut graph, &[a, b, c, first, second]);
        let crossing = graph.create_intersection_point(first, second, 0, true).unwrap();
        let coordinate = graph.create_point_coordinate(crossing, CoordinateAxis::X).unwrap();
        attach_all(&mut graph, &[crossing, coordinate]);
        assert!(graph.node(crossing).unwrap().exists());

        // 让第二条直线与第一条重合
        graph.set_point_location(c, unit(1.0, 0.0, 0.0)).unwrap();
        graph.mark_kids_out_of_date(c);
        graph.update(c, &mut UpdateState::display_only());
        assert!(!graph.node(crossing).unwrap().exists());
        assert!(!graph.node(coordinate).unwrap().exists());
        assert!(!graph.node(crossing).unwrap().location().unwrap().x().is_nan());
    }

    #[test]
    fn stale_parent_defers_update() {
        let mut graph = Graph::default();
        let a = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let b = graph.create_free_point(unit(1.0, 0.0, 0.0));
        let line = graph.create_line(a, b).unwrap();
        attach_all(&mut graph, &[a, b, line]);
        graph.mark_kids_out_of_date(a);
        assert!(!graph.can_update_now(line));
        graph.update(line, &mut UpdateState::display_only());
        assert!(graph.node(line).unwrap().is_out_of_date());
        graph.update(a, &mut UpdateState::display_only());
        assert!(!graph.node(line).unwrap().is_out_of_date());
    }

    #[test]
    fn intersection_parents_are_stored_canonically() {
        let mut graph = Graph::default();
        let a = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let b = graph.create_free_point(unit(1.0, 0.0, 0.0));
        let c = graph.create_free_point(unit(0.0, 1.0, 0.0));
        let circle = graph.create_circle(a, b).unwrap();
        let line = graph.create_line(b, c).unwrap();
        let point = graph.create_intersection_point(circle, line, 1, false).unwrap();
        let node = graph.node(point).unwrap();
        assert_eq!(node.parents(), &[line, circle]);
        assert_eq!(node.name(), "Intersection(Li-1,C1,1)");
        assert!(!node.showing());
        assert!(matches!(
            graph.create_intersection_point(a, line, 0, false),
            Err(EngineError::NotOneDimensional(_))
        ));
    }

    #[test]
    fn rename_rejects_taken_names() {
        let mut graph = Graph::default();
        let a = graph.create_free_point(unit(0.0, 0.0, 1.0));
        let b = graph.create_free_point(unit(1.0, 0.0, 0.0));
        assert!(matches!(graph.rename(b, "P1"), Err(EngineError::DuplicateName(_))));
        graph.rename(a, "A").unwrap();
        assert_eq!(graph.lookup("A"), Some(a));
        assert_eq!(graph.lookup("P1"), None);
        // 下一个自动名称跳过已占用的名称
        let c = graph.create_free_point(unit(0.0, 1.0, 0.0));
        assert_eq!(graph.node(c).unwrap().name(), "P3");
    }
}
