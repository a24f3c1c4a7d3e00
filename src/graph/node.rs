//! Typed view of the execution graph ("prompt") handed over by the host.
//!
//! JSON shape:
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "inputs": {
//!       "seed": 42,
//!       "positive": ["6", 0],     // link: [node id, output slot]
//!       ...
//!     }
//!   },
//!   ...
//! }
//!
//! Nodes are ingested leniently: anything that does not look like a node
//! becomes `NodeKind::Other` with no inputs and is ignored downstream.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Node kinds the extractor knows how to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    SeedEverywhere,
    LatentUpscale,
    KSampler,
    KSamplerAdvanced,
    UltimateSdUpscale,
    LoraStacker,
    EfficientLoader,
    EfficientLoaderSdxl,
    Other(String),
}

impl NodeKind {
    pub fn from_class_type(class_type: &str) -> Self {
        match class_type {
            "Seed Everywhere" => Self::SeedEverywhere,
            "LatentUpscale" => Self::LatentUpscale,
            "KSampler" => Self::KSampler,
            "KSamplerAdvanced" => Self::KSamplerAdvanced,
            "UltimateSDUpscale" => Self::UltimateSdUpscale,
            "LoRA Stacker" => Self::LoraStacker,
            "Efficient Loader" => Self::EfficientLoader,
            "Eff. Loader SDXL" => Self::EfficientLoaderSdxl,
            other => Self::Other(other.to_string()),
        }
    }

    /// The class_type string this kind was read from.
    pub fn class_type(&self) -> &str {
        match self {
            Self::SeedEverywhere => "Seed Everywhere",
            Self::LatentUpscale => "LatentUpscale",
            Self::KSampler => "KSampler",
            Self::KSamplerAdvanced => "KSamplerAdvanced",
            Self::UltimateSdUpscale => "UltimateSDUpscale",
            Self::LoraStacker => "LoRA Stacker",
            Self::EfficientLoader => "Efficient Loader",
            Self::EfficientLoaderSdxl => "Eff. Loader SDXL",
            Self::Other(name) => name,
        }
    }
}

/// A single input value, classified at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput<'a> {
    /// Edge to another node's output.
    Link { node: Cow<'a, str>, slot: f64 },
    Literal(&'a Value),
}

impl<'a> NodeInput<'a> {
    /// Links are encoded as `[node_id, slot]` with a numeric slot. The id is
    /// normally a string; a numeric id is looked up by its decimal form. A
    /// literal two-element list of that shape is indistinguishable and will
    /// be read as a link.
    pub fn classify(value: &'a Value) -> Self {
        if let Value::Array(items) = value {
            if let [id, Value::Number(slot)] = items.as_slice() {
                let node = match id {
                    Value::String(id) => Some(Cow::Borrowed(id.as_str())),
                    Value::Number(id) => Some(Cow::Owned(id.to_string())),
                    _ => None,
                };
                if let (Some(node), Some(slot)) = (node, slot.as_f64()) {
                    return Self::Link { node, slot };
                }
            }
        }
        Self::Literal(value)
    }

    /// Whether a value that should be prompt text is really a leftover link.
    ///
    /// Only string ids under 6 characters count; node ids in practice are
    /// short. A genuine `["short", 1]` text list is misread the same way.
    pub fn is_reference_artifact(value: &Value) -> bool {
        matches!(
            value.as_array().map(Vec::as_slice),
            Some([Value::String(id), Value::Number(_)]) if id.chars().count() < 6
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawNode {
    #[serde(default)]
    class_type: Option<String>,

    #[serde(default)]
    inputs: Option<Map<String, Value>>,
}

/// One node of the graph with its kind resolved.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub inputs: Map<String, Value>,
}

impl GraphNode {
    /// Input value, with JSON null treated as absent.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).filter(|v| !v.is_null())
    }
}

/// Execution graph in document order, with id lookup.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    raw: Map<String, Value>,
    nodes: Vec<GraphNode>,
    index: BTreeMap<String, usize>,
}

impl ExecutionGraph {
    pub fn from_prompt(prompt: &Map<String, Value>) -> Self {
        let mut nodes = Vec::with_capacity(prompt.len());
        let mut index = BTreeMap::new();

        for (id, value) in prompt {
            let raw: Option<RawNode> = serde_json::from_value(value.clone()).ok();
            let (kind, inputs) = match raw {
                Some(RawNode {
                    class_type: Some(class_type),
                    inputs,
                }) => (
                    NodeKind::from_class_type(&class_type),
                    inputs.unwrap_or_default(),
                ),
                Some(RawNode {
                    class_type: None,
                    inputs,
                }) => (NodeKind::Other(String::new()), inputs.unwrap_or_default()),
                None => (NodeKind::Other(String::new()), Map::new()),
            };

            index.insert(id.clone(), nodes.len());
            nodes.push(GraphNode {
                id: id.clone(),
                kind,
                inputs,
            });
        }

        Self {
            raw: prompt.clone(),
            nodes,
            index,
        }
    }

    /// The untyped mapping, for key searches.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Follow a link input one hop and read the target's `text` input.
    pub fn linked_text(&self, node: &GraphNode, field: &str) -> Option<&Value> {
        match NodeInput::classify(node.input(field)?) {
            NodeInput::Link { node: target, slot } => {
                tracing::trace!(from = %node.id, field, target = %target, slot, "following prompt link");
                self.node(&target)?.input("text")
            }
            NodeInput::Literal(_) => None,
        }
    }
}
