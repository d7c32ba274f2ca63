//! Earth Engine computation graphs.
//!
//! The REST API accepts a computation as an `Expression`: a map of named value nodes and the
//! name of the node holding the result. Every node here is written inline, so an expression
//! always has a single root value named `"0"`.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const ROOT: &str = "0";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Expression {
    pub result: String,
    pub values: BTreeMap<String, ValueNode>,
}

impl Expression {
    pub fn new(root: ValueNode) -> Self {
        Self {
            result: ROOT.to_string(),
            values: BTreeMap::from([(ROOT.to_string(), root)]),
        }
    }

    pub fn root(self: &Self) -> Option<&ValueNode> {
        self.values.get(&self.result)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ValueNode {
    #[serde(rename = "constantValue")]
    Constant(Value),
    #[serde(rename = "arrayValue")]
    Array { values: Vec<ValueNode> },
    #[serde(rename = "functionInvocationValue")]
    Invocation(Invocation),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub function_name: String,
    pub arguments: BTreeMap<String, ValueNode>,
}

impl ValueNode {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    pub fn array(values: Vec<ValueNode>) -> Self {
        Self::Array { values }
    }

    /// Call a platform algorithm, e.g. `Image.clip`, with named arguments.
    pub fn invoke<const N: usize>(function_name: &str, arguments: [(&str, ValueNode); N]) -> Self {
        Self::Invocation(Invocation {
            function_name: function_name.to_string(),
            arguments: arguments
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        })
    }

    pub fn function_name(self: &Self) -> Option<&str> {
        match self {
            Self::Invocation(invocation) => Some(invocation.function_name.as_str()),
            _ => None,
        }
    }

    pub fn argument(self: &Self, name: &str) -> Option<&ValueNode> {
        match self {
            Self::Invocation(invocation) => invocation.arguments.get(name),
            _ => None,
        }
    }
}
