use sphere_core::arc::SegmentArc;
use sphere_core::style::StylePanel;

use super::{AddObject, Command, CommandKind, NameTable};
use crate::errors::{EngineError, OpcodeError};
use crate::graph::{CoordinateAxis, Graph, NodeId, NodeKind};
use crate::opcode::{
    FieldKey, Fields, Opcode, OpcodeWriter, format_bool, format_number, format_style,
};

impl Command {
    /// 编码为一行文本。组合命令没有单独的文本形式，返回 `None`。
    pub fn to_opcode(&self, graph: &Graph) -> Result<Option<String>, EngineError> {
        let text = match &self.kind {
            CommandKind::Group(_) => return Ok(None),
            CommandKind::Add(add) => match &add.encoded {
                Some(text) => text.clone(),
                None => encode_add(graph, add.node, add.label)?,
            },
            CommandKind::MovePoint(movement) => OpcodeWriter::new(Opcode::MovePoint)
                .field(FieldKey::ObjectName, graph.name_of(movement.point)?)
                .field(FieldKey::OldVector, movement.from.to_fixed())
                .field(FieldKey::NewVector, movement.to.to_fixed())
                .finish(),
            CommandKind::Delete(delete) => OpcodeWriter::new(Opcode::DeleteNode)
                .field(FieldKey::ObjectName, graph.name_of(delete.root)?)
                .finish(),
            CommandKind::ChangeStyle(change) => OpcodeWriter::new(Opcode::ChangeStyle)
                .field(FieldKey::ObjectName, graph.name_of(change.node)?)
                .field(FieldKey::StylePanel, change.panel.as_str())
                .field(FieldKey::OldStyle, format_style(&change.before)?)
                .field(FieldKey::NewStyle, format_style(&change.after)?)
                .finish(),
            CommandKind::SetShowing(change) => OpcodeWriter::new(Opcode::SetShowing)
                .field(FieldKey::ObjectName, graph.name_of(change.node)?)
                .field(FieldKey::OldShowing, format_bool(change.before))
                .field(FieldKey::NewShowing, format_bool(change.after))
                .finish(),
            CommandKind::ConvertToUserCreated(convert) => {
                OpcodeWriter::new(Opcode::ConvertToUserCreated)
                    .field(FieldKey::ObjectName, graph.name_of(convert.point)?)
                    .finish()
            }
        };
        Ok(Some(text))
    }

    /// 编码为若干行文本，组合命令按执行顺序展开。
    pub fn to_opcodes(&self, graph: &Graph) -> Result<Vec<String>, EngineError> {
        match &self.kind {
            CommandKind::Group(commands) => {
                let mut lines = Vec::new();
                for command in commands {
                    lines.extend(command.to_opcodes(graph)?);
                }
                Ok(lines)
            }
            _ => Ok(self.to_opcode(graph)?.into_iter().collect()),
        }
    }

    /// 从一行文本重建命令。新对象会在 `graph` 中分配（尚未挂入图中）并登记到 `names`。
    pub fn parse(
        text: &str,
        graph: &mut Graph,
        names: &mut NameTable,
    ) -> Result<Command, OpcodeError> {
        let fields = Fields::parse(text)?;
        let first_new = graph.arena_len();
        let mut parser = Parser {
            fields: &fields,
            graph,
            names,
            pending: Vec::new(),
        };
        match parser.command() {
            Ok(command) => {
                let Parser { names, pending, .. } = parser;
                names.extend(pending);
                Ok(command)
            }
            Err(err) => {
                // 解析失败的行不留下任何可解析的名称
                parser.graph.release_names_since(first_new);
                Err(err)
            }
        }
    }
}

fn opcode_for(graph: &Graph, id: NodeId) -> Result<Opcode, EngineError> {
    Ok(match graph.require(id)?.kind() {
        NodeKind::FreePoint { .. } => Opcode::AddPoint,
        NodeKind::IntersectionPoint { .. } => Opcode::AddIntersectionPoint,
        NodeKind::PolarPoint { .. } => Opcode::AddPolarPoint,
        NodeKind::Line { .. } => Opcode::AddLine,
        NodeKind::Segment { .. } => Opcode::AddSegment,
        NodeKind::Circle { .. } => Opcode::AddCircle,
        NodeKind::PointCoordinate { .. } => Opcode::AddPointCoordinate,
        NodeKind::SegmentLength { .. } => Opcode::AddSegmentLength,
        NodeKind::Label { .. } => {
            return Err(graph.wrong_kind(id, "point, curve or measurement"));
        }
    })
}

pub(super) fn encode_add(graph: &Graph, id: NodeId, label: Option<NodeId>) -> Result<String, EngineError> {
    let opcode = opcode_for(graph, id)?;
    let node = graph.require(id)?;
    let mut writer = OpcodeWriter::new(opcode)
        .field(FieldKey::ObjectName, node.name())
        .field(FieldKey::ObjectExists, format_bool(node.exists()))
        .field(FieldKey::ObjectShowing, format_bool(node.showing()));

    if opcode.fields().contains(&FieldKey::LabelName) {
        let label = label
            .ok_or_else(|| EngineError::MissingLabel(node.name().to_string()))
            .and_then(|label| graph.require(label))?;
        writer = writer
            .field(FieldKey::ObjectFrontStyle, format_style(&node.style().front)?)
            .field(FieldKey::ObjectBackStyle, format_style(&node.style().back)?)
            .field(FieldKey::LabelName, label.name())
            .field(
                FieldKey::LabelVector,
                label.location().unwrap_or_default().to_fixed(),
            )
            .field(FieldKey::LabelShowing, format_bool(label.showing()))
            .field(FieldKey::LabelExists, format_bool(label.exists()))
            .field(FieldKey::LabelStyle, format_style(&label.style().front)?);
    }

    writer = match *node.kind() {
        NodeKind::FreePoint { location } => writer.field(FieldKey::PointVector, location.to_fixed()),
        NodeKind::IntersectionPoint {
            location,
            parent1,
            parent2,
            order,
            is_user_created,
        } => writer
            .field(FieldKey::PointVector, location.to_fixed())
            .field(FieldKey::IntersectionParent1Name, graph.name_of(parent1)?)
            .field(FieldKey::IntersectionParent2Name, graph.name_of(parent2)?)
            .field(FieldKey::IntersectionOrder, order.to_string())
            .field(FieldKey::IntersectionUserCreated, format_bool(is_user_created)),
        NodeKind::PolarPoint {
            location,
            parent,
            index,
        } => writer
            .field(FieldKey::PointVector, location.to_fixed())
            .field(FieldKey::PolarPointParentName, graph.name_of(parent)?)
            .field(FieldKey::PolarPointIndex, index.to_string()),
        NodeKind::Line { start, end, normal } => writer
            .field(FieldKey::LineStartPointName, graph.name_of(start)?)
            .field(FieldKey::LineEndPointName, graph.name_of(end)?)
            .field(FieldKey::LineNormalVector, normal.to_fixed()),
        NodeKind::Segment { start, end, arc } => writer
            .field(FieldKey::SegmentStartPointName, graph.name_of(start)?)
            .field(FieldKey::SegmentEndPointName, graph.name_of(end)?)
            .field(FieldKey::SegmentNormalVector, arc.normal.to_fixed())
            .field(FieldKey::SegmentArcLength, format_number(arc.arc_length)),
        NodeKind::Circle {
            center,
            circle_point,
            ..
        } => writer
            .field(FieldKey::CircleCenterPointName, graph.name_of(center)?)
            .field(FieldKey::CircleCirclePointName, graph.name_of(circle_point)?),
        NodeKind::PointCoordinate { point, axis, .. } => writer
            .field(FieldKey::CoordinatePointName, graph.name_of(point)?)
            .field(FieldKey::CoordinateAxis, axis.as_str()),
        NodeKind::SegmentLength { segment, .. } => {
            writer.field(FieldKey::MeasuredSegmentName, graph.name_of(segment)?)
        }
        NodeKind::Label { .. } => writer,
    };
    Ok(writer.finish())
}

struct Parser<'a> {
    fields: &'a Fields,
    graph: &'a mut Graph,
    names: &'a mut NameTable,
    /// 本行新建对象的名称，整行解析成功后才写入 `names`。
    pending: Vec<(String, NodeId)>,
}

impl Parser<'_> {
    fn command(&mut self) -> Result<Command, OpcodeError> {
        let fields = self.fields;
        match fields.opcode() {
            Opcode::AddPoint => {
                let location = fields.vector(FieldKey::PointVector)?;
                self.claim_plottable_names()?;
                let id = self.graph.create_free_point(location);
                self.finish_plottable(id)
            }
            Opcode::AddLine => {
                let start = self.resolve(FieldKey::LineStartPointName)?;
                let end = self.resolve(FieldKey::LineEndPointName)?;
                let normal = fields.vector(FieldKey::LineNormalVector)?;
                self.claim_plottable_names()?;
                let id = self.graph.create_line(start, end).map_err(|e| self.reject(e))?;
                self.graph
                    .set_line_normal(id, normal)
                    .map_err(|e| self.reject(e))?;
                self.finish_plottable(id)
            }
            Opcode::AddSegment => {
                let start = self.resolve(FieldKey::SegmentStartPointName)?;
                let end = self.resolve(FieldKey::SegmentEndPointName)?;
                let normal = fields.vector(FieldKey::SegmentNormalVector)?;
                let arc_length = fields.number(FieldKey::SegmentArcLength)?;
                self.claim_plottable_names()?;
                let id = self
                    .graph
                    .create_segment(start, end)
                    .map_err(|e| self.reject(e))?;
                self.graph
                    .set_segment_arc(id, SegmentArc::new(normal, arc_length))
                    .map_err(|e| self.reject(e))?;
                self.finish_plottable(id)
            }
            Opcode::AddCircle => {
                let center = self.resolve(FieldKey::CircleCenterPointName)?;
                let circle_point = self.resolve(FieldKey::CircleCirclePointName)?;
                self.claim_plottable_names()?;
                let id = self
                    .graph
                    .create_circle(center, circle_point)
                    .map_err(|e| self.reject(e))?;
                self.finish_plottable(id)
            }
            Opcode::AddIntersectionPoint => {
                let first = self.resolve(FieldKey::IntersectionParent1Name)?;
                let second = self.resolve(FieldKey::IntersectionParent2Name)?;
                let order = fields.index(FieldKey::IntersectionOrder)?;
                let user_created = fields.boolean(FieldKey::IntersectionUserCreated)?;
                let location = fields.vector(FieldKey::PointVector)?;
                self.claim_plottable_names()?;
                let id = self
                    .graph
                    .create_intersection_point(first, second, order, user_created)
                    .map_err(|e| self.reject(e))?;
                self.graph
                    .set_location(id, location)
                    .map_err(|e| self.reject(e))?;
                self.finish_plottable(id)
            }
            Opcode::AddPolarPoint => {
                let parent = self.resolve(FieldKey::PolarPointParentName)?;
                let index = fields.index(FieldKey::PolarPointIndex)?;
                let location = fields.vector(FieldKey::PointVector)?;
                self.claim_plottable_names()?;
                let id = self
                    .graph
                    .create_polar_point(parent, index)
                    .map_err(|e| self.reject(e))?;
                self.graph
                    .set_location(id, location)
                    .map_err(|e| self.reject(e))?;
                self.finish_plottable(id)
            }
            Opcode::AddPointCoordinate => {
                let point = self.resolve(FieldKey::CoordinatePointName)?;
                let raw = fields.text(FieldKey::CoordinateAxis)?;
                let axis = CoordinateAxis::parse(raw)
                    .ok_or_else(|| fields.invalid(FieldKey::CoordinateAxis, raw))?;
                self.claim_name(FieldKey::ObjectName)?;
                let id = self
                    .graph
                    .create_point_coordinate(point, axis)
                    .map_err(|e| self.reject(e))?;
                self.finish_measurement(id)
            }
            Opcode::AddSegmentLength => {
                let segment = self.resolve(FieldKey::MeasuredSegmentName)?;
                self.claim_name(FieldKey::ObjectName)?;
                let id = self
                    .graph
                    .create_segment_length(segment)
                    .map_err(|e| self.reject(e))?;
                self.finish_measurement(id)
            }
            Opcode::MovePoint => {
                let point = self.resolve(FieldKey::ObjectName)?;
                if !matches!(
                    self.graph.node(point).map(|node| node.kind()),
                    Some(NodeKind::FreePoint { .. })
                ) {
                    let name = fields.text(FieldKey::ObjectName)?.to_string();
                    return Err(self.reject(EngineError::NotMovable(name)));
                }
                Ok(Command::move_point(
                    point,
                    fields.vector(FieldKey::OldVector)?,
                    fields.vector(FieldKey::NewVector)?,
                ))
            }
            Opcode::DeleteNode => Ok(Command::delete(self.resolve(FieldKey::ObjectName)?)),
            Opcode::ChangeStyle => {
                let node = self.resolve(FieldKey::ObjectName)?;
                let raw = fields.text(FieldKey::StylePanel)?;
                let panel = StylePanel::parse(raw)
                    .ok_or_else(|| fields.invalid(FieldKey::StylePanel, raw))?;
                Ok(Command::change_style(
                    node,
                    panel,
                    fields.style(FieldKey::OldStyle)?,
                    fields.style(FieldKey::NewStyle)?,
                ))
            }
            Opcode::SetShowing => Ok(Command::set_showing(
                self.resolve(FieldKey::ObjectName)?,
                fields.boolean(FieldKey::OldShowing)?,
                fields.boolean(FieldKey::NewShowing)?,
            )),
            Opcode::ConvertToUserCreated => {
                let point = self.resolve(FieldKey::ObjectName)?;
                if !matches!(
                    self.graph.node(point).map(|node| node.kind()),
                    Some(NodeKind::IntersectionPoint { .. })
                ) {
                    let name = fields.text(FieldKey::ObjectName)?.to_string();
                    return Err(self.reject(EngineError::WrongKind {
                        name,
                        expected: "intersection point",
                    }));
                }
                Ok(Command::convert_to_user_created(point))
            }
        }
    }

    /// 解析得到的新增命令直接以解析出的状态固定文本。
    fn added(&self, node: NodeId, label: Option<NodeId>) -> Command {
        Command::new(CommandKind::Add(AddObject {
            node,
            label,
            encoded: encode_add(&*self.graph, node, label).ok(),
        }))
    }

    fn reject(&self, err: EngineError) -> OpcodeError {
        OpcodeError::Rejected {
            opcode: self.fields.opcode().as_str().to_string(),
            reason: err.to_string(),
        }
    }

    fn resolve(&self, key: FieldKey) -> Result<NodeId, OpcodeError> {
        let name = self.fields.text(key)?;
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| OpcodeError::UnresolvedName {
                opcode: self.fields.opcode().as_str().to_string(),
                name: name.to_string(),
            })
    }

    /// 在分配对象之前确认名称未被占用。
    fn claim_name(&self, key: FieldKey) -> Result<(), OpcodeError> {
        let name = self.fields.text(key)?;
        if name.is_empty() {
            return Err(self.fields.invalid(key, name));
        }
        if self.names.contains_key(name) || self.graph.lookup(name).is_some() {
            return Err(self.reject(EngineError::DuplicateName(name.to_string())));
        }
        Ok(())
    }

    /// 对象与其标签的名称都须空闲且互不相同。
    fn claim_plottable_names(&self) -> Result<(), OpcodeError> {
        self.claim_name(FieldKey::ObjectName)?;
        self.claim_name(FieldKey::LabelName)?;
        let label = self.fields.text(FieldKey::LabelName)?;
        if label == self.fields.text(FieldKey::ObjectName)? {
            return Err(self.reject(EngineError::DuplicateName(label.to_string())));
        }
        Ok(())
    }

    fn name_node(&mut self, id: NodeId, key: FieldKey) -> Result<(), OpcodeError> {
        let name = self.fields.text(key)?.to_string();
        self.graph.rename(id, &name).map_err(|e| self.reject(e))?;
        self.pending.push((name, id));
        Ok(())
    }

    fn finish_measurement(&mut self, id: NodeId) -> Result<Command, OpcodeError> {
        let fields = self.fields;
        self.name_node(id, FieldKey::ObjectName)?;
        let exists = fields.boolean(FieldKey::ObjectExists)?;
        let showing = fields.boolean(FieldKey::ObjectShowing)?;
        self.graph
            .set_exists(id, exists)
            .and_then(|_| self.graph.set_showing(id, showing))
            .map_err(|e| self.reject(e))?;
        Ok(self.added(id, None))
    }

    /// 写入对象的公共字段，并重建其标签。
    fn finish_plottable(&mut self, id: NodeId) -> Result<Command, OpcodeError> {
        let fields = self.fields;
        let exists = fields.boolean(FieldKey::ObjectExists)?;
        let showing = fields.boolean(FieldKey::ObjectShowing)?;
        let front = fields.style(FieldKey::ObjectFrontStyle)?;
        let back = fields.style(FieldKey::ObjectBackStyle)?;
        let label_vector = fields.vector(FieldKey::LabelVector)?;
        let label_showing = fields.boolean(FieldKey::LabelShowing)?;
        let label_exists = fields.boolean(FieldKey::LabelExists)?;
        let label_style = fields.style(FieldKey::LabelStyle)?;

        self.name_node(id, FieldKey::ObjectName)?;
        let label = self.graph.create_label(id).map_err(|e| self.reject(e))?;
        self.name_node(label, FieldKey::LabelName)?;

        let graph = &mut *self.graph;
        let applied = graph
            .set_exists(id, exists)
            .and_then(|_| graph.set_showing(id, showing))
            .and_then(|_| graph.set_style_panel(id, StylePanel::Front, &front))
            .and_then(|_| graph.set_style_panel(id, StylePanel::Back, &back))
            .and_then(|_| graph.set_location(label, label_vector))
            .and_then(|_| graph.set_showing(label, label_showing))
            .and_then(|_| graph.set_exists(label, label_exists))
            .and_then(|_| graph.set_style_panel(label, StylePanel::Label, &label_style));
        applied.map_err(|e| self.reject(e))?;
        Ok(self.added(id, Some(label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sphere_core::geometry::Vector3;
    use sphere_core::style::StyleOptions;

    fn unit(x: f64, y: f64, z: f64) -> Vector3 {
        Vector3::new(x, y, z).normalize_or_zero()
    }

    fn point_with_label(graph: &mut Graph, v: Vector3) -> Command {
        let id = graph.create_free_point(v);
        let label = graph.create_label(id).unwrap();
        Command::add(id, Some(label))
    }

    #[test]
    fn add_point_text_is_stable() {
        let mut graph = Graph::default();
        let command = point_with_label(&mut graph, unit(1.0, 2.0, 2.0));
        let text = command.to_opcode(&graph).unwrap().unwrap();
        assert!(text.starts_with("AddPoint&objectName=P1&objectExists=true&objectShowing=true&"));
        assert!(text.ends_with("&pointVector=(0.333333333,0.666666667,0.666666667)"));

        let mut other = Graph::default();
        let mut names = NameTable::new();
        let parsed = Command::parse(&text, &mut other, &mut names).unwrap();
        assert_eq!(parsed.to_opcode(&other).unwrap().unwrap(), text);
        assert!(names.contains_key("P1"));
        assert!(names.contains_key("Lb-1"));
    }

    #[test]
    fn curve_and_intersection_text_survives_parsing() {
        let mut graph = Graph::default();
        let mut commands = Vec::new();
        let a = point_with_label(&mut graph, unit(0.0, 0.0, 1.0));
        let b = point_with_label(&mut graph, unit(1.0, 0.0, 0.0));
        let c = point_with_label(&mut graph, unit(0.0, 1.0, 0.0));
        let ids: Vec<NodeId> = [&a, &b, &c]
            .iter()
            .map(|command| match command.kind() {
                CommandKind::Add(add) => add.node,
                _ => unreachable!(),
            })
            .collect();
        commands.extend([a, b, c]);
        let line = graph.create_line(ids[0], ids[1]).unwrap();
        let line_label = graph.create_label(line).unwrap();
        let segment = graph.create_segment(ids[1], ids[2]).unwrap();
        let segment_label = graph.create_label(segment).unwrap();
        let point = graph.create_intersection_point(segment, line, 0, false).unwrap();
        let point_label = graph.create_label(point).unwrap();
        let length = graph.create_segment_length(segment).unwrap();
        commands.push(Command::add(line, Some(line_label)));
        commands.push(Command::add(segment, Some(segment_label)));
        commands.push(Command::add(point, Some(point_label)));
        commands.push(Command::add(length, None));
        let mut group = Command::group(commands);
        group.execute(&mut graph).unwrap();

        let lines = group.to_opcodes(&graph).unwrap();
        assert_eq!(lines.len(), 7);
        assert!(group.to_opcode(&graph).unwrap().is_none());
        assert!(lines[5].contains("intersectionParent1Name=Li-1&intersectionParent2Name=Ls-1"));

        let mut replica = Graph::default();
        let mut names = NameTable::new();
        for line in &lines {
            let mut parsed = Command::parse(line, &mut replica, &mut names).unwrap();
            assert_eq!(&parsed.to_opcode(&replica).unwrap().unwrap(), line);
            parsed.execute(&mut replica).unwrap();
        }
        assert_eq!(replica.node_count(), graph.node_count());
        assert_eq!(replica.edge_count(), graph.edge_count());
    }

    #[test]
    fn style_and_showing_changes_encode_both_states() {
        let mut graph = Graph::default();
        let mut add = point_with_label(&mut graph, unit(0.0, 0.0, 1.0));
        add.execute(&mut graph).unwrap();
        let point = graph.lookup("P1").unwrap();
        let before = graph.node(point).unwrap().style().front.clone();
        let mut after = before.clone();
        after.stroke_color = Some("red&blue".to_string());
        let change = Command::change_style(point, StylePanel::Front, before, after);
        let text = change.to_opcode(&graph).unwrap().unwrap();
        assert!(text.contains("red#38;blue"));

        let mut names = NameTable::from([("P1".to_string(), point)]);
        let parsed = Command::parse(&text, &mut graph, &mut names).unwrap();
        assert_eq!(parsed, change);

        let showing = Command::set_showing(point, true, false);
        let text = showing.to_opcode(&graph).unwrap().unwrap();
        assert_eq!(text, "SetShowing&objectName=P1&oldShowing=true&newShowing=false");
        assert_eq!(Command::parse(&text, &mut graph, &mut names).unwrap(), showing);
    }

    #[test]
    fn parse_reports_unresolved_and_duplicate_names() {
        let mut graph = Graph::default();
        let mut names = NameTable::new();
        assert!(matches!(
            Command::parse("DeleteNode&objectName=Ghost", &mut graph, &mut names),
            Err(OpcodeError::UnresolvedName { .. })
        ));

        let add = point_with_label(&mut graph, unit(0.0, 0.0, 1.0));
        let text = add.to_opcode(&graph).unwrap().unwrap();
        assert!(matches!(
            Command::parse(&text, &mut graph, &mut names),
            Err(OpcodeError::Rejected { .. })
        ));

        let style = serde_json::to_string(&StyleOptions::default()).unwrap();
        let bad_panel = format!(
            "ChangeStyle&objectName=P1&stylePanel=side&oldStyle={style}&newStyle={style}"
        );
        names.insert("P1".to_string(), graph.lookup("P1").unwrap());
        assert!(matches!(
            Command::parse(&bad_panel, &mut graph, &mut names),
            Err(OpcodeError::InvalidValue { .. })
        ));
    }
}
