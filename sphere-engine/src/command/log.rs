use tracing::{info, warn};

use super::{Command, NameTable};
use crate::errors::EngineError;
use crate::graph::Graph;

/// 回放脚本时遇到无法解析或执行的行如何处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// 立即停止并返回错误，之前已执行的行保留。
    #[default]
    Abort,
    /// 记录警告并跳过该行。
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    /// 从 1 开始的行号。
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: Vec<SkippedLine>,
}

/// 已执行与已撤销命令的两个栈。
#[derive(Debug, Default)]
pub struct CommandLog {
    done: Vec<Command>,
    undone: Vec<Command>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 执行新命令并入栈，同时清空重做栈。
    pub fn execute(&mut self, mut command: Command, graph: &mut Graph) -> Result<(), EngineError> {
        command.execute(graph)?;
        self.done.push(command);
        self.undone.clear();
        Ok(())
    }

    /// 撤销最近一条命令；没有可撤销的命令时返回 `Ok(false)`。
    pub fn undo(&mut self, graph: &mut Graph) -> Result<bool, EngineError> {
        let Some(mut command) = self.done.pop() else {
            return Ok(false);
        };
        if let Err(err) = command.restore_state(graph) {
            self.done.push(command);
            return Err(err);
        }
        self.undone.push(command);
        Ok(true)
    }

    pub fn redo(&mut self, graph: &mut Graph) -> Result<bool, EngineError> {
        let Some(mut command) = self.undone.pop() else {
            return Ok(false);
        };
        if let Err(err) = command.execute(graph) {
            self.undone.push(command);
            return Err(err);
        }
        self.done.push(command);
        Ok(true)
    }

    #[inline]
    pub fn can_undo(&self) -> bool {
        !self.done.is_empty()
    }

    #[inline]
    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }

    #[inline]
    pub fn done(&self) -> &[Command] {
        &self.done
    }

    /// 按执行顺序输出所有已执行命令，每行一条。
    pub fn to_script(&self, graph: &Graph) -> Result<String, EngineError> {
        let mut lines = Vec::new();
        for command in &self.done {
            lines.extend(command.to_opcodes(graph)?);
        }
        Ok(lines.join("\n"))
    }

    /// 逐行解析并执行脚本。空行与 `//` 开头的注释行会被忽略。
    ///
    /// 名称解析表以图中现有对象为起点，脚本中新建的对象依次加入。
    pub fn replay(
        &mut self,
        script: &str,
        graph: &mut Graph,
        policy: ReplayPolicy,
    ) -> Result<ReplayReport, EngineError> {
        let mut names: NameTable = graph
            .registered()
            .map(|node| (node.name().to_string(), node.id()))
            .collect();
        let mut report = ReplayReport::default();

        for (index, raw) in script.lines().enumerate() {
            let line = index + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with("//") {
                continue;
            }
            let outcome = Command::parse(text, graph, &mut names)
                .map_err(EngineError::from)
                .and_then(|command| self.execute(command, graph));
            match outcome {
                Ok(()) => report.applied += 1,
                Err(err) => match policy {
                    ReplayPolicy::Abort => {
                        return Err(EngineError::Replay {
                            line,
                            source: Box::new(err),
                        });
                    }
                    ReplayPolicy::Skip => {
                        warn!(line, error = %err, "跳过无法回放的命令");
                        report.skipped.push(SkippedLine {
                            line,
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }

        info!(
            applied = report.applied,
            skipped = report.skipped.len(),
            "脚本回放完成"
        );
        Ok(report)
    }
}
