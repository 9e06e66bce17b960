//! 球面作图引擎
//!
//! 维护几何对象依赖图，按拓扑顺序惰性更新派生几何量，自动发现新对象与已有对象的交点，
//! 并以可撤销、可序列化的命令记录所有修改。

pub mod command;
pub mod discovery;
pub mod graph;
pub mod opcode;
pub mod query;
pub mod scene;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq)]
    pub enum EngineError {
        #[error("node with id {0} not found")]
        NodeNotFound(usize),
        #[error("{0} is not a line, segment or circle")]
        NotOneDimensional(String),
        #[error("({first}, {second}) is not in canonical order")]
        NonCanonicalPair { first: String, second: String },
        #[error("{name} is not a {expected}")]
        WrongKind { name: String, expected: &'static str },
        #[error("ordinal {0} is out of range (expected 0 or 1)")]
        InvalidOrdinal(usize),
        #[error("vector has zero length")]
        DegenerateVector,
        #[error("{0} cannot be moved directly")]
        NotMovable(String),
        #[error("name {0} is already in use")]
        DuplicateName(String),
        #[error("cannot {action} a command that is {status}")]
        InvalidTransition {
            action: &'static str,
            status: &'static str,
        },
        #[error("{0} has no label to encode")]
        MissingLabel(String),
        #[error("line {line}: {source}")]
        Replay {
            line: usize,
            source: Box<EngineError>,
        },
        #[error("style could not be serialized: {0}")]
        Style(String),
        #[error(transparent)]
        Opcode(#[from] OpcodeError),
    }

    /// 解析命令文本时的错误。
    #[derive(Debug, Error, PartialEq)]
    pub enum OpcodeError {
        #[error("command text is empty")]
        Empty,
        #[error("unknown opcode {0}")]
        UnknownOpcode(String),
        #[error("{opcode}: malformed token {token:?}")]
        MalformedToken { opcode: String, token: String },
        #[error("{opcode}: missing field {field}")]
        MissingField { opcode: String, field: &'static str },
        #[error("{opcode}: unexpected field {field}")]
        UnexpectedField { opcode: String, field: String },
        #[error("{opcode}: field {field} appears more than once")]
        DuplicateField { opcode: String, field: &'static str },
        #[error("{opcode}: invalid value {value:?} for {field}")]
        InvalidValue {
            opcode: String,
            field: &'static str,
            value: String,
        },
        #[error("{opcode}: unknown object {name}")]
        UnresolvedName { opcode: String, name: String },
        #[error("{opcode}: {reason}")]
        Rejected { opcode: String, reason: String },
    }
}
