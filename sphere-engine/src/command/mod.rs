//! 可撤销的修改命令。
//!
//! 每条命令都能 `execute`、`restore_state`，并能编码为一行文本（见 [`crate::opcode`]）。
//! 命令的生命周期为 Created → Done ⇄ Undone，非法转换返回错误而不是静默忽略。

mod codec;
mod log;

use std::collections::HashMap;

use sphere_core::geometry::Vector3;
use sphere_core::style::{NodeStyle, StyleOptions, StylePanel, StyleTarget};
use tracing::debug;

use crate::errors::EngineError;
use crate::graph::{Graph, NodeId, NodeKind, ObjectState, UpdateMode, UpdateState};

pub use log::{CommandLog, ReplayPolicy, ReplayReport, SkippedLine};

/// 解析命令文本时名称到对象的映射。
pub type NameTable = HashMap<String, NodeId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Created,
    Done,
    Undone,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Created => "created",
            CommandStatus::Done => "done",
            CommandStatus::Undone => "undone",
        }
    }
}

/// 新增一个对象（及其标签）。
///
/// 文本在首次执行（或解析）时固定，之后对象被移动也不会改写历史中的这一行。
#[derive(Debug, Clone, PartialEq)]
pub struct AddObject {
    pub node: NodeId,
    pub label: Option<NodeId>,
    encoded: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovePoint {
    pub point: NodeId,
    pub from: Vector3,
    pub to: Vector3,
    recorded: Vec<ObjectState>,
}

/// 删除一个对象及其所有后代。
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteNode {
    pub root: NodeId,
    removals: Vec<Removal>,
    recorded: Vec<ObjectState>,
}

/// 被移除对象原先在索引与各父对象子列表中的位置。
#[derive(Debug, Clone, PartialEq)]
struct Removal {
    id: NodeId,
    index_position: Option<usize>,
    edges: Vec<(NodeId, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeStyle {
    pub node: NodeId,
    pub panel: StylePanel,
    pub before: StyleOptions,
    pub after: StyleOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetShowing {
    pub node: NodeId,
    pub before: bool,
    pub after: bool,
}

/// 把自动发现的交点转为用户创建的交点。
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertToUserCreated {
    pub point: NodeId,
    previous: Option<(bool, NodeStyle)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    Add(AddObject),
    MovePoint(MovePoint),
    Delete(DeleteNode),
    ChangeStyle(ChangeStyle),
    SetShowing(SetShowing),
    ConvertToUserCreated(ConvertToUserCreated),
    /// 按顺序执行、逆序撤销；序列化时展开为各子命令。
    Group(Vec<Command>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    status: CommandStatus,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            status: CommandStatus::Created,
        }
    }

    pub fn add(node: NodeId, label: Option<NodeId>) -> Self {
        Self::new(CommandKind::Add(AddObject {
            node,
            label,
            encoded: None,
        }))
    }

    pub fn move_point(point: NodeId, from: Vector3, to: Vector3) -> Self {
        Self::new(CommandKind::MovePoint(MovePoint {
            point,
            from,
            to,
            recorded: Vec::new(),
        }))
    }

    pub fn delete(root: NodeId) -> Self {
        Self::new(CommandKind::Delete(DeleteNode {
            root,
            removals: Vec::new(),
            recorded: Vec::new(),
        }))
    }

    pub fn change_style(
        node: NodeId,
        panel: StylePanel,
        before: StyleOptions,
        after: StyleOptions,
    ) -> Self {
        Self::new(CommandKind::ChangeStyle(ChangeStyle {
            node,
            panel,
            before,
            after,
        }))
    }

    pub fn set_showing(node: NodeId, before: bool, after: bool) -> Self {
        Self::new(CommandKind::SetShowing(SetShowing {
            node,
            before,
            after,
        }))
    }

    pub fn convert_to_user_created(point: NodeId) -> Self {
        Self::new(CommandKind::ConvertToUserCreated(ConvertToUserCreated {
            point,
            previous: None,
        }))
    }

    pub fn group(commands: Vec<Command>) -> Self {
        Self::new(CommandKind::Group(commands))
    }

    #[inline]
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    #[inline]
    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// 执行（或重做）命令。
    pub fn execute(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        if self.status == CommandStatus::Done {
            return Err(self.invalid("execute"));
        }
        match &mut self.kind {
            CommandKind::Add(add) => {
                add.execute(graph)?;
                if add.encoded.is_none() {
                    // 无法编码（例如缺少标签）不影响执行，序列化时再报告
                    add.encoded = codec::encode_add(graph, add.node, add.label).ok();
                }
            }
            CommandKind::MovePoint(movement) => movement.execute(graph)?,
            CommandKind::Delete(delete) => delete.execute(graph)?,
            CommandKind::ChangeStyle(change) => {
                graph.set_style_panel(change.node, change.panel, &change.after)?
            }
            CommandKind::SetShowing(change) => graph.set_showing(change.node, change.after)?,
            CommandKind::ConvertToUserCreated(convert) => convert.execute(graph)?,
            CommandKind::Group(commands) => {
                for position in 0..commands.len() {
                    if let Err(err) = commands[position].execute(graph) {
                        // 回滚已执行的部分
                        for done in commands[..position].iter_mut().rev() {
                            done.restore_state(graph)?;
                        }
                        return Err(err);
                    }
                }
            }
        }
        self.status = CommandStatus::Done;
        debug!(command = self.describe(), "命令已执行");
        Ok(())
    }

    /// 撤销命令，把图恢复到执行前的状态。
    pub fn restore_state(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        if self.status != CommandStatus::Done {
            return Err(self.invalid("restore"));
        }
        match &mut self.kind {
            CommandKind::Add(add) => add.restore(graph)?,
            CommandKind::MovePoint(movement) => movement.restore(graph)?,
            CommandKind::Delete(delete) => delete.restore(graph)?,
            CommandKind::ChangeStyle(change) => {
                graph.set_style_panel(change.node, change.panel, &change.before)?
            }
            CommandKind::SetShowing(change) => graph.set_showing(change.node, change.before)?,
            CommandKind::ConvertToUserCreated(convert) => convert.restore(graph)?,
            CommandKind::Group(commands) => {
                for command in commands.iter_mut().rev() {
                    command.restore_state(graph)?;
                }
            }
        }
        self.status = CommandStatus::Undone;
        debug!(command = self.describe(), "命令已撤销");
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            action,
            status: self.status.as_str(),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self.kind {
            CommandKind::Add(_) => "add",
            CommandKind::MovePoint(_) => "move",
            CommandKind::Delete(_) => "delete",
            CommandKind::ChangeStyle(_) => "style",
            CommandKind::SetShowing(_) => "showing",
            CommandKind::ConvertToUserCreated(_) => "convert",
            CommandKind::Group(_) => "group",
        }
    }
}

fn refresh_from(graph: &mut Graph, id: NodeId) {
    graph.mark_kids_out_of_date(id);
    graph.update(id, &mut UpdateState::display_only());
}

impl AddObject {
    fn execute(&self, graph: &mut Graph) -> Result<(), EngineError> {
        graph.attach(self.node)?;
        if let Some(label) = self.label {
            graph.attach(label)?;
        }
        refresh_from(graph, self.node);
        Ok(())
    }

    fn restore(&self, graph: &mut Graph) -> Result<(), EngineError> {
        if let Some(label) = self.label {
            graph.detach(label)?;
        }
        graph.detach(self.node)
    }
}

impl MovePoint {
    fn execute(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        let mut record = UpdateState::record(UpdateMode::RecordStateForMove);
        graph.mark_kids_out_of_date(self.point);
        graph.update(self.point, &mut record);
        self.recorded = record.states;

        graph.set_point_location(self.point, self.to)?;
        refresh_from(graph, self.point);
        Ok(())
    }

    fn restore(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        for state in &self.recorded {
            graph.restore_object_state(state);
        }
        graph.set_point_location(self.point, self.from)?;
        refresh_from(graph, self.point);
        Ok(())
    }
}

impl DeleteNode {
    fn execute(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        graph.require(self.root)?;
        let mut record = UpdateState::record(UpdateMode::RecordStateForDelete);
        graph.mark_kids_out_of_date(self.root);
        graph.update(self.root, &mut record);

        // 记录顺序即拓扑顺序，逆序移除可保证子对象先于父对象
        self.removals.clear();
        for state in record.states.iter().rev() {
            let id = state.id;
            let index_position = graph.remove_from_index(id)?;
            let parents = graph.require(id)?.parents().to_vec();
            let mut edges = Vec::with_capacity(parents.len());
            for parent in parents {
                if let Some(position) = graph.unregister_child(parent, id)? {
                    edges.push((parent, position));
                }
            }
            self.removals.push(Removal {
                id,
                index_position,
                edges,
            });
        }
        self.recorded = record.states;
        debug!(root = %self.root, removed = self.removed().count(), "已移除对象及其后代");
        Ok(())
    }

    fn restore(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        for removal in self.removals.iter().rev() {
            for (parent, position) in removal.edges.iter().rev() {
                graph.insert_child_at(*parent, removal.id, *position);
            }
            if removal.index_position.is_some() {
                graph.insert_into_index(removal.id, removal.index_position)?;
            }
        }
        for state in &self.recorded {
            graph.restore_object_state(state);
        }
        refresh_from(graph, self.root);
        Ok(())
    }

    /// 最近一次执行时移除的对象，父对象在前。
    pub fn removed(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.removals.iter().rev().map(|removal| removal.id)
    }
}

impl ConvertToUserCreated {
    fn execute(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        let node = graph.require(self.point)?;
        if !matches!(node.kind(), NodeKind::IntersectionPoint { .. }) {
            return Err(graph.wrong_kind(self.point, "intersection point"));
        }
        self.previous = Some((node.showing(), node.style().clone()));
        graph.set_user_created(self.point, true)?;
        graph.set_showing(self.point, true)?;
        graph.set_style(self.point, NodeStyle::default_for(StyleTarget::Point))
    }

    fn restore(&mut self, graph: &mut Graph) -> Result<(), EngineError> {
        graph.set_user_created(self.point, false)?;
        if let Some((showing, style)) = self.previous.take() {
            graph.set_showing(self.point, showing)?;
            graph.set_style(self.point, style)?;
        }
        Ok(())
    }
}
