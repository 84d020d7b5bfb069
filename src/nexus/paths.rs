//! # 数据集定位
//!
//! 按路径片段或属性值定位数据集。每个候选项带名称，
//! 按优先级依次尝试，返回 `Found` 或 `NotFound`。
//!
//! ## 候选列表
//! - 图像：`interpretation=image`
//! - 已保存的平场：路径包含 `/data` 且 `interpretation=image`
//! - delta/gamma 马达通道（当前名称、`diff.1` 拼写、旧的大写名称）
//! - delta/gamma 静态元数据（`raw_value` 路径的四种写法）
//!
//! ## 依赖关系
//! - 被 `nexus/angles.rs` 和 `nexus/store.rs` 使用
//! - 使用 `nexus/tree.rs`

use crate::nexus::tree::{Dataset, ScanTree};

/// 数据集匹配规则
#[derive(Debug, Clone, Copy)]
pub enum DatasetMatcher {
    /// 路径包含片段
    PathContains(&'static str),
    /// 属性等于给定值
    AttributeEquals {
        attr: &'static str,
        value: &'static str,
    },
    /// 所有规则同时满足
    All(&'static [DatasetMatcher]),
}

impl DatasetMatcher {
    pub fn matches(&self, path: &str, dataset: &Dataset) -> bool {
        match self {
            DatasetMatcher::PathContains(fragment) => path.contains(fragment),
            DatasetMatcher::AttributeEquals { attr, value } => dataset.attr(attr) == Some(*value),
            DatasetMatcher::All(rules) => rules.iter().all(|m| m.matches(path, dataset)),
        }
    }
}

/// 查找结果
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Found { path: &'a str, dataset: &'a Dataset },
    NotFound,
}

/// 命名候选项
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub name: &'static str,
    pub matcher: DatasetMatcher,
}

impl Candidate {
    /// 按路径顺序返回第一个匹配的数据集
    pub fn lookup<'a>(&self, tree: &'a ScanTree) -> Lookup<'a> {
        tree.iter()
            .find(|(path, ds)| self.matcher.matches(path, ds))
            .map_or(Lookup::NotFound, |(path, dataset)| Lookup::Found {
                path,
                dataset,
            })
    }
}

/// 按顺序尝试候选列表，返回第一个命中的候选项与数据集
pub fn first_match<'a>(
    tree: &'a ScanTree,
    candidates: &[Candidate],
) -> Option<(Candidate, &'a str, &'a Dataset)> {
    candidates.iter().find_map(|c| match c.lookup(tree) {
        Lookup::Found { path, dataset } => Some((*c, path, dataset)),
        Lookup::NotFound => None,
    })
}

const fn attribute(attr: &'static str, value: &'static str) -> DatasetMatcher {
    DatasetMatcher::AttributeEquals { attr, value }
}

/// 探测器图像
pub const IMAGE: Candidate = Candidate {
    name: "image",
    matcher: attribute("interpretation", "image"),
};

/// 已保存的平场图像
pub const SAVED_IMAGE: Candidate = Candidate {
    name: "saved image",
    matcher: DatasetMatcher::All(&[
        DatasetMatcher::PathContains("/data"),
        DatasetMatcher::AttributeEquals {
            attr: "interpretation",
            value: "image",
        },
    ]),
};

/// delta 马达通道
pub const DELTA_MOTOR: &[Candidate] = &[
    Candidate {
        name: "delta interpretation",
        matcher: attribute("interpretation", "Delta"),
    },
    Candidate {
        name: "delta positioner",
        matcher: attribute("long_name", "d13-1-cx1/ex/dif.1-delta/position"),
    },
    Candidate {
        name: "delta positioner (diff.1)",
        matcher: attribute("long_name", "d13-1-cx1/ex/diff.1-delta/position"),
    },
    Candidate {
        name: "delta positioner (legacy uppercase)",
        matcher: attribute("long_name", "D13-1-CX1/EX/DIF.1-DELTA/position"),
    },
];

/// gamma 马达通道
pub const GAMMA_MOTOR: &[Candidate] = &[
    Candidate {
        name: "gamma interpretation",
        matcher: attribute("interpretation", "Gamma"),
    },
    Candidate {
        name: "gamma positioner",
        matcher: attribute("long_name", "d13-1-cx1/ex/dif.1-gamma/position"),
    },
    Candidate {
        name: "gamma positioner (diff.1)",
        matcher: attribute("long_name", "d13-1-cx1/ex/diff.1-gamma/position"),
    },
    Candidate {
        name: "gamma positioner (legacy uppercase)",
        matcher: attribute("long_name", "D13-1-CX1/EX/DIF.1-GAMMA/position"),
    },
];

/// delta 静态元数据
pub const DELTA_METADATA: &[Candidate] = &[
    Candidate {
        name: "delta raw value",
        matcher: DatasetMatcher::PathContains("d13-1-cx1__ex__dif.1-delta/raw_value"),
    },
    Candidate {
        name: "delta raw value (diff.1)",
        matcher: DatasetMatcher::PathContains("d13-1-cx1__ex__diff.1-delta/raw_value"),
    },
    Candidate {
        name: "delta raw value (caps)",
        matcher: DatasetMatcher::PathContains("d13-1-cx1__EX__DIF.1-DELTA__#1/raw_value"),
    },
    Candidate {
        name: "delta raw value (legacy uppercase)",
        matcher: DatasetMatcher::PathContains("D13-1-CX1__EX__DIF.1-DELTA__#1/raw_value"),
    },
];

/// gamma 静态元数据
pub const GAMMA_METADATA: &[Candidate] = &[
    Candidate {
        name: "gamma raw value",
        matcher: DatasetMatcher::PathContains("d13-1-cx1__ex__dif.1-gamma/raw_value"),
    },
    Candidate {
        name: "gamma raw value (diff.1)",
        matcher: DatasetMatcher::PathContains("d13-1-cx1__ex__diff.1-gamma/raw_value"),
    },
    Candidate {
        name: "gamma raw value (caps)",
        matcher: DatasetMatcher::PathContains("d13-1-cx1__EX__DIF.1-GAMMA__#1/raw_value"),
    },
    Candidate {
        name: "gamma raw value (legacy uppercase)",
        matcher: DatasetMatcher::PathContains("D13-1-CX1__EX__DIF.1-GAMMA__#1/raw_value"),
    },
];
