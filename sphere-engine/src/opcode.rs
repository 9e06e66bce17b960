//! 命令的文本编码。
//!
//! 一条命令编码为 `Opcode&key=value&key=value...`，字段顺序由版本化的字段表决定，
//! 因此同一状态总是得到逐字节相同的文本。值中的保留字符（`&`、`=`、`/`、`#`）
//! 以及不可打印或非 ASCII 字符写作 `#<十进制码点>;`。

use std::collections::HashMap;
use std::fmt::Write as _;

use sphere_core::geometry::Vector3;
use sphere_core::style::StyleOptions;

use crate::errors::{EngineError, OpcodeError};

/// 当前字段表版本。
pub const SCHEMA_VERSION: u32 = 1;

const TOKEN_SEPARATOR: char = '&';
const KEY_SEPARATOR: char = '=';

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        let reserved = matches!(ch, '&' | '=' | '/' | '#');
        if reserved || !(' '..='~').contains(&ch) {
            // 写入 String 不会失败
            let _ = write!(escaped, "#{};", ch as u32);
        } else {
            escaped.push(ch);
        }
    }
    escaped
}

/// [`escape`] 的逆运算；转义序列不完整或码点非法时返回 `None`。
pub fn unescape(text: &str) -> Option<String> {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(position) = rest.find('#') {
        decoded.push_str(&rest[..position]);
        let after = &rest[position + 1..];
        let end = after.find(';')?;
        let digits = &after[..end];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        decoded.push(char::from_u32(digits.parse().ok()?)?);
        rest = &after[end + 1..];
    }
    decoded.push_str(rest);
    Some(decoded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    AddPoint,
    AddLine,
    AddSegment,
    AddCircle,
    AddIntersectionPoint,
    AddPolarPoint,
    AddPointCoordinate,
    AddSegmentLength,
    MovePoint,
    DeleteNode,
    ChangeStyle,
    SetShowing,
    ConvertToUserCreated,
}

impl Opcode {
    pub const ALL: [Opcode; 13] = [
        Opcode::AddPoint,
        Opcode::AddLine,
        Opcode::AddSegment,
        Opcode::AddCircle,
        Opcode::AddIntersectionPoint,
        Opcode::AddPolarPoint,
        Opcode::AddPointCoordinate,
        Opcode::AddSegmentLength,
        Opcode::MovePoint,
        Opcode::DeleteNode,
        Opcode::ChangeStyle,
        Opcode::SetShowing,
        Opcode::ConvertToUserCreated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::AddPoint => "AddPoint",
            Opcode::AddLine => "AddLine",
            Opcode::AddSegment => "AddSegment",
            Opcode::AddCircle => "AddCircle",
            Opcode::AddIntersectionPoint => "AddIntersectionPoint",
            Opcode::AddPolarPoint => "AddPolarPoint",
            Opcode::AddPointCoordinate => "AddPointCoordinate",
            Opcode::AddSegmentLength => "AddSegmentLength",
            Opcode::MovePoint => "MovePoint",
            Opcode::DeleteNode => "DeleteNode",
            Opcode::ChangeStyle => "ChangeStyle",
            Opcode::SetShowing => "SetShowing",
            Opcode::ConvertToUserCreated => "ConvertToUserCreated",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|opcode| opcode.as_str() == text)
    }

    /// 该命令在当前版本字段表中的字段，按输出顺序排列。
    pub fn fields(self) -> &'static [FieldKey] {
        schema(SCHEMA_VERSION, self).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    ObjectName,
    ObjectExists,
    ObjectShowing,
    ObjectFrontStyle,
    ObjectBackStyle,
    LabelName,
    LabelVector,
    LabelShowing,
    LabelExists,
    LabelStyle,
    PointVector,
    LineStartPointName,
    LineEndPointName,
    LineNormalVector,
    SegmentStartPointName,
    SegmentEndPointName,
    SegmentNormalVector,
    SegmentArcLength,
    CircleCenterPointName,
    CircleCirclePointName,
    IntersectionParent1Name,
    IntersectionParent2Name,
    IntersectionOrder,
    IntersectionUserCreated,
    PolarPointParentName,
    PolarPointIndex,
    CoordinatePointName,
    CoordinateAxis,
    MeasuredSegmentName,
    OldVector,
    NewVector,
    StylePanel,
    OldStyle,
    NewStyle,
    OldShowing,
    NewShowing,
}

impl FieldKey {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::ObjectName => "objectName",
            FieldKey::ObjectExists => "objectExists",
            FieldKey::ObjectShowing => "objectShowing",
            FieldKey::ObjectFrontStyle => "objectFrontStyle",
            FieldKey::ObjectBackStyle => "objectBackStyle",
            FieldKey::LabelName => "labelName",
            FieldKey::LabelVector => "labelVector",
            FieldKey::LabelShowing => "labelShowing",
            FieldKey::LabelExists => "labelExists",
            FieldKey::LabelStyle => "labelStyle",
            FieldKey::PointVector => "pointVector",
            FieldKey::LineStartPointName => "lineStartPointName",
            FieldKey::LineEndPointName => "lineEndPointName",
            FieldKey::LineNormalVector => "lineNormalVector",
            FieldKey::SegmentStartPointName => "segmentStartPointName",
            FieldKey::SegmentEndPointName => "segmentEndPointName",
            FieldKey::SegmentNormalVector => "segmentNormalVector",
            FieldKey::SegmentArcLength => "segmentArcLength",
            FieldKey::CircleCenterPointName => "circleCenterPointName",
            FieldKey::CircleCirclePointName => "circleCirclePointName",
            FieldKey::IntersectionParent1Name => "intersectionParent1Name",
            FieldKey::IntersectionParent2Name => "intersectionParent2Name",
            FieldKey::IntersectionOrder => "intersectionOrder",
            FieldKey::IntersectionUserCreated => "intersectionUserCreated",
            FieldKey::PolarPointParentName => "polarPointParentName",
            FieldKey::PolarPointIndex => "polarPointIndex",
            FieldKey::CoordinatePointName => "coordinatePointName",
            FieldKey::CoordinateAxis => "coordinateAxis",
            FieldKey::MeasuredSegmentName => "measuredSegmentName",
            FieldKey::OldVector => "oldVector",
            FieldKey::NewVector => "newVector",
            FieldKey::StylePanel => "stylePanel",
            FieldKey::OldStyle => "oldStyle",
            FieldKey::NewStyle => "newStyle",
            FieldKey::OldShowing => "oldShowing",
            FieldKey::NewShowing => "newShowing",
        }
    }
}

use FieldKey as F;

// 点与曲线共用的对象字段与标签字段在前，专有字段在后
const ADD_POINT: &[FieldKey] = &[
    F::ObjectName,
    F::ObjectExists,
    F::ObjectShowing,
    F::ObjectFrontStyle,
    F::ObjectBackStyle,
    F::LabelName,
    F::LabelVector,
    F::LabelShowing,
    F::LabelExists,
    F::LabelStyle,
    F::PointVector,
];

const ADD_LINE: &[FieldKey] = &[
    F::ObjectName,
    F::ObjectExists,
    F::ObjectShowing,
    F::ObjectFrontStyle,
    F::ObjectBackStyle,
    F::LabelName,
    F::LabelVector,
    F::LabelShowing,
    F::LabelExists,
    F::LabelStyle,
    F::LineStartPointName,
    F::LineEndPointName,
    F::LineNormalVector,
];

const ADD_SEGMENT: &[FieldKey] = &[
    F::ObjectName,
    F::ObjectExists,
    F::ObjectShowing,
    F::ObjectFrontStyle,
    F::ObjectBackStyle,
    F::LabelName,
    F::LabelVector,
    F::LabelShowing,
    F::LabelExists,
    F::LabelStyle,
    F::SegmentStartPointName,
    F::SegmentEndPointName,
    F::SegmentNormalVector,
    F::SegmentArcLength,
];

const ADD_CIRCLE: &[FieldKey] = &[
    F::ObjectName,
    F::ObjectExists,
    F::ObjectShowing,
    F::ObjectFrontStyle,
    F::ObjectBackStyle,
    F::LabelName,
    F::LabelVector,
    F::LabelShowing,
    F::LabelExists,
    F::LabelStyle,
    F::CircleCenterPointName,
    F::CircleCirclePointName,
];

const ADD_INTERSECTION_POINT: &[FieldKey] = &[
    F::ObjectName,
    F::ObjectExists,
    F::ObjectShowing,
    F::ObjectFrontStyle,
    F::ObjectBackStyle,
    F::LabelName,
    F::LabelVector,
    F::LabelShowing,
    F::LabelExists,
    F::LabelStyle,
    F::PointVector,
    F::IntersectionParent1Name,
    F::IntersectionParent2Name,
    F::IntersectionOrder,
    F::IntersectionUserCreated,
];

const ADD_POLAR_POINT: &[FieldKey] = &[
    F::ObjectName,
    F::ObjectExists,
    F::ObjectShowing,
    F::ObjectFrontStyle,
    F::ObjectBackStyle,
    F::LabelName,
    F::LabelVector,
    F::LabelShowing,
    F::LabelExists,
    F::LabelStyle,
    F::PointVector,
    F::PolarPointParentName,
    F::PolarPointIndex,
];

/// 某版本字段表中的一行。
#[derive(Debug)]
pub struct FieldSchema {
    pub version: u32,
    pub opcode: Opcode,
    pub fields: &'static [FieldKey],
}

pub static SCHEMA_V1: &[FieldSchema] = &[
    FieldSchema {
        version: 1,
        opcode: Opcode::AddPoint,
        fields: ADD_POINT,
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddLine,
        fields: ADD_LINE,
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddSegment,
        fields: ADD_SEGMENT,
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddCircle,
        fields: ADD_CIRCLE,
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddIntersectionPoint,
        fields: ADD_INTERSECTION_POINT,
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddPolarPoint,
        fields: ADD_POLAR_POINT,
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddPointCoordinate,
        fields: &[
            F::ObjectName,
            F::ObjectExists,
            F::ObjectShowing,
            F::CoordinatePointName,
            F::CoordinateAxis,
        ],
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::AddSegmentLength,
        fields: &[
            F::ObjectName,
            F::ObjectExists,
            F::ObjectShowing,
            F::MeasuredSegmentName,
        ],
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::MovePoint,
        fields: &[F::ObjectName, F::OldVector, F::NewVector],
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::DeleteNode,
        fields: &[F::ObjectName],
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::ChangeStyle,
        fields: &[F::ObjectName, F::StylePanel, F::OldStyle, F::NewStyle],
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::SetShowing,
        fields: &[F::ObjectName, F::OldShowing, F::NewShowing],
    },
    FieldSchema {
        version: 1,
        opcode: Opcode::ConvertToUserCreated,
        fields: &[F::ObjectName],
    },
];

/// 查询字段表。
pub fn schema(version: u32, opcode: Opcode) -> Option<&'static [FieldKey]> {
    let table = match version {
        1 => SCHEMA_V1,
        _ => return None,
    };
    table
        .iter()
        .find(|row| row.opcode == opcode)
        .map(|row| row.fields)
}

pub fn format_bool(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

pub fn format_number(value: f64) -> String {
    format!("{value:.9}")
}

pub fn format_style(style: &StyleOptions) -> Result<String, EngineError> {
    serde_json::to_string(style).map_err(|err| EngineError::Style(err.to_string()))
}

/// 按字段表顺序拼装命令文本。
#[derive(Debug)]
pub struct OpcodeWriter {
    opcode: Opcode,
    values: HashMap<FieldKey, String>,
}

impl OpcodeWriter {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            values: HashMap::new(),
        }
    }

    pub fn field(mut self, key: FieldKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// 输出文本。字段表中未提供的字段输出为空值。
    pub fn finish(self) -> String {
        let mut text = self.opcode.as_str().to_string();
        for key in self.opcode.fields() {
            text.push(TOKEN_SEPARATOR);
            text.push_str(key.as_str());
            text.push(KEY_SEPARATOR);
            if let Some(value) = self.values.get(key) {
                text.push_str(&escape(value));
            }
        }
        text
    }
}

/// 解码后的一条命令文本。
#[derive(Debug)]
pub struct Fields {
    opcode: Opcode,
    values: HashMap<FieldKey, String>,
}

impl Fields {
    /// 拆分并校验：未知字段、重复字段、缺失字段都视为错误。
    pub fn parse(text: &str) -> Result<Self, OpcodeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OpcodeError::Empty);
        }
        let mut tokens = text.split(TOKEN_SEPARATOR);
        let head = tokens.next().unwrap_or_default();
        let opcode =
            Opcode::parse(head).ok_or_else(|| OpcodeError::UnknownOpcode(head.to_string()))?;
        let schema = opcode.fields();
        let name = opcode.as_str().to_string();

        let mut values = HashMap::new();
        for token in tokens {
            let Some((key, raw)) = token.split_once(KEY_SEPARATOR) else {
                return Err(OpcodeError::MalformedToken {
                    opcode: name,
                    token: token.to_string(),
                });
            };
            let Some(field) = schema.iter().copied().find(|field| field.as_str() == key) else {
                return Err(OpcodeError::UnexpectedField {
                    opcode: name,
                    field: key.to_string(),
                });
            };
            let value = unescape(raw).ok_or_else(|| OpcodeError::InvalidValue {
                opcode: name.clone(),
                field: field.as_str(),
                value: raw.to_string(),
            })?;
            if values.insert(field, value).is_some() {
                return Err(OpcodeError::DuplicateField {
                    opcode: name,
                    field: field.as_str(),
                });
            }
        }

        if let Some(missing) = schema.iter().find(|field| !values.contains_key(field)) {
            return Err(OpcodeError::MissingField {
                opcode: name,
                field: missing.as_str(),
            });
        }
        Ok(Self { opcode, values })
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn text(&self, key: FieldKey) -> Result<&str, OpcodeError> {
        self.values
            .get(&key)
            .map(String::as_str)
            .ok_or_else(|| OpcodeError::MissingField {
                opcode: self.opcode.as_str().to_string(),
                field: key.as_str(),
            })
    }

    pub fn invalid(&self, key: FieldKey, value: &str) -> OpcodeError {
        OpcodeError::InvalidValue {
            opcode: self.opcode.as_str().to_string(),
            field: key.as_str(),
            value: value.to_string(),
        }
    }

    pub fn boolean(&self, key: FieldKey) -> Result<bool, OpcodeError> {
        match self.text(key)? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(self.invalid(key, other)),
        }
    }

    pub fn vector(&self, key: FieldKey) -> Result<Vector3, OpcodeError> {
        let raw = self.text(key)?;
        Vector3::parse_fixed(raw).ok_or_else(|| self.invalid(key, raw))
    }

    pub fn number(&self, key: FieldKey) -> Result<f64, OpcodeError> {
        let raw = self.text(key)?;
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| self.invalid(key, raw))
    }

    pub fn index(&self, key: FieldKey) -> Result<usize, OpcodeError> {
        let raw = self.text(key)?;
        raw.parse::<usize>().map_err(|_| self.invalid(key, raw))
    }

    pub fn style(&self, key: FieldKey) -> Result<StyleOptions, OpcodeError> {
        let raw = self.text(key)?;
        serde_json::from_str(raw).map_err(|_| self.invalid(key, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_covers_reserved_and_non_ascii() {
        let raw = "a&b=c/d#e\n\u{00e9}";
        let escaped = escape(raw);
        assert_eq!(escaped, "a#38;b#61;c#47;d#35;e#10;#233;");
        assert_eq!(unescape(&escaped).as_deref(), Some(raw));
        assert!(unescape("#12").is_none());
        assert!(unescape("#x;").is_none());
    }

    #[test]
    fn every_opcode_has_a_schema_row() {
        for opcode in Opcode::ALL {
            assert!(!opcode.fields().is_empty(), "{}", opcode.as_str());
            assert_eq!(Opcode::parse(opcode.as_str()), Some(opcode));
        }
        assert!(schema(2, Opcode::AddPoint).is_none());
        assert_eq!(Opcode::AddPoint.fields().len(), 11);
        assert_eq!(Opcode::AddPoint.fields()[10], FieldKey::PointVector);
    }

    #[test]
    fn writer_follows_schema_order() {
        let text = OpcodeWriter::new(Opcode::SetShowing)
            .field(FieldKey::NewShowing, "false")
            .field(FieldKey::ObjectName, "P&1")
            .field(FieldKey::OldShowing, "true")
            .finish();
        assert_eq!(text, "SetShowing&objectName=P#38;1&oldShowing=true&newShowing=false");

        let fields = Fields::parse(&text).unwrap();
        assert_eq!(fields.text(FieldKey::ObjectName).unwrap(), "P&1");
        assert!(!fields.boolean(FieldKey::NewShowing).unwrap());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(Fields::parse("  ").unwrap_err(), OpcodeError::Empty);
        assert!(matches!(
            Fields::parse("Teleport&objectName=P1"),
            Err(OpcodeError::UnknownOpcode(_))
        ));
        assert!(matches!(
            Fields::parse("DeleteNode&objectName=P1&colour=red"),
            Err(OpcodeError::UnexpectedField { .. })
        ));
        assert!(matches!(
            Fields::parse("DeleteNode"),
            Err(OpcodeError::MissingField { .. })
        ));
        assert!(matches!(
            Fields::parse("DeleteNode&objectName=P1&objectName=P2"),
            Err(OpcodeError::DuplicateField { .. })
        ));
        assert!(matches!(
            Fields::parse("DeleteNode&objectName"),
            Err(OpcodeError::MalformedToken { .. })
        ));
    }
}
