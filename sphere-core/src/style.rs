//! 对象样式描述。
//!
//! 样式以面板（正面、背面、标签）为单位保存，字段均为可选：
//! 更新时只覆盖提供了值的字段。序列化为 JSON 后嵌入命令文本。

use serde::{Deserialize, Serialize};

const POINT_STROKE: &str = "hsla(240, 55%, 55%, 1)";
const POINT_FILL: &str = "hsla(0, 0%, 100%, 1)";
const CURVE_STROKE: &str = "hsla(217, 90%, 61%, 1)";
const LABEL_FILL: &str = "hsla(0, 0%, 0%, 1)";
const BACK_OPACITY: f64 = 0.5;

/// 自动发现的交点使用较窄的发光宽度。
pub const REDUCED_GLOW_PERCENT: f64 = 50.0;
pub const DEFAULT_GLOW_PERCENT: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StylePanel {
    #[default]
    Front,
    Back,
    Label,
}

impl StylePanel {
    pub fn as_str(self) -> &'static str {
        match self {
            StylePanel::Front => "front",
            StylePanel::Back => "back",
            StylePanel::Label => "label",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "front" => Some(StylePanel::Front),
            "back" => Some(StylePanel::Back),
            "label" => Some(StylePanel::Label),
            _ => None,
        }
    }
}

/// 绘制对象的大类，决定默认样式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleTarget {
    Point,
    Curve,
    Label,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleOptions {
    pub panel: StylePanel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_radius_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dash_array: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_back_style: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glow_width_percent: Option<f64>,
}

impl StyleOptions {
    /// 某类对象在某个面板上的默认样式。
    pub fn default_for(target: StyleTarget, panel: StylePanel) -> Self {
        let mut options = StyleOptions {
            panel,
            ..StyleOptions::default()
        };
        match (target, panel) {
            (StyleTarget::Label, _) => {
                options.panel = StylePanel::Label;
                options.fill_color = Some(LABEL_FILL.to_string());
            }
            (StyleTarget::Point, StylePanel::Back) => {
                options.point_radius_percent = Some(90.0);
                options.stroke_color = Some(POINT_STROKE.to_string());
                options.fill_color = Some(POINT_FILL.to_string());
                options.dynamic_back_style = Some(true);
            }
            (StyleTarget::Point, _) => {
                options.point_radius_percent = Some(100.0);
                options.stroke_color = Some(POINT_STROKE.to_string());
                options.fill_color = Some(POINT_FILL.to_string());
                options.glow_width_percent = Some(DEFAULT_GLOW_PERCENT);
            }
            (StyleTarget::Curve, StylePanel::Back) => {
                options.stroke_width_percent = Some(100.0);
                options.stroke_color = Some(CURVE_STROKE.to_string());
                options.opacity = Some(BACK_OPACITY);
                options.dash_array = Some(vec![5.0, 5.0]);
                options.dynamic_back_style = Some(true);
            }
            (StyleTarget::Curve, _) => {
                options.stroke_width_percent = Some(100.0);
                options.stroke_color = Some(CURVE_STROKE.to_string());
                options.opacity = Some(1.0);
                options.glow_width_percent = Some(DEFAULT_GLOW_PERCENT);
            }
        }
        options
    }

    /// 把 `other` 中已设置的字段覆盖到当前样式，面板保持不变。
    pub fn apply(&mut self, other: &StyleOptions) {
        if other.point_radius_percent.is_some() {
            self.point_radius_percent = other.point_radius_percent;
        }
        if other.stroke_width_percent.is_some() {
            self.stroke_width_percent = other.stroke_width_percent;
        }
        if other.stroke_color.is_some() {
            self.stroke_color.clone_from(&other.stroke_color);
        }
        if other.fill_color.is_some() {
            self.fill_color.clone_from(&other.fill_color);
        }
        if other.dash_array.is_some() {
            self.dash_array.clone_from(&other.dash_array);
        }
        if other.opacity.is_some() {
            self.opacity = other.opacity;
        }
        if other.dynamic_back_style.is_some() {
            self.dynamic_back_style = other.dynamic_back_style;
        }
        if other.glow_width_percent.is_some() {
            self.glow_width_percent = other.glow_width_percent;
        }
    }
}

/// 对象的完整样式：正面与背面两个面板。标签只使用正面面板。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStyle {
    pub front: StyleOptions,
    pub back: StyleOptions,
}

impl NodeStyle {
    pub fn default_for(target: StyleTarget) -> Self {
        match target {
            StyleTarget::Label => {
                let label = StyleOptions::default_for(StyleTarget::Label, StylePanel::Label);
                Self {
                    front: label.clone(),
                    back: label,
                }
            }
            _ => Self {
                front: StyleOptions::default_for(target, StylePanel::Front),
                back: StyleOptions::default_for(target, StylePanel::Back),
            },
        }
    }

    /// 自动发现的交点：默认样式但发光宽度减半。
    pub fn reduced_glow_point() -> Self {
        let mut style = Self::default_for(StyleTarget::Point);
        style.front.glow_width_percent = Some(REDUCED_GLOW_PERCENT);
        style
    }

    pub fn panel(&self, panel: StylePanel) -> &StyleOptions {
        match panel {
            StylePanel::Back => &self.back,
            StylePanel::Front | StylePanel::Label => &self.front,
        }
    }

    pub fn panel_mut(&mut self, panel: StylePanel) -> &mut StyleOptions {
        match panel {
            StylePanel::Back => &mut self.back,
            StylePanel::Front | StylePanel::Label => &mut self.front,
        }
    }
}
