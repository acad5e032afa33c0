//! Incremental JSON report construction.
//!
//! Nodes live in an arena and containers refer to children by index; the
//! builder keeps a stack of open containers. Rendering walks the arena once
//! into a `serde_json::Value`.

use serde_json::{Map, Value};

enum Node {
    Leaf(Value),
    Object(Vec<(String, usize)>),
    Array(Vec<usize>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    /// A keyed entry was added to an array or an unkeyed one to an object.
    WrongContainer,
    /// `end` was called with only the root open.
    UnbalancedEnd,
    /// `finish` was called with containers still open.
    Unclosed(usize),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::WrongContainer => write!(f, "entry does not fit the open container"),
            ReportError::UnbalancedEnd => write!(f, "no open container to close"),
            ReportError::Unclosed(count) => write!(f, "{count} containers left open"),
        }
    }
}

impl std::error::Error for ReportError {}

pub struct ReportBuilder {
    nodes: Vec<Node>,
    open: Vec<usize>,
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportBuilder {
    /// Builder whose root is an object.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Object(Vec::new())],
            open: vec![0],
        }
    }

    pub fn value(&mut self, key: &str, value: impl Into<Value>) -> Result<&mut Self, ReportError> {
        let index = self.alloc(Node::Leaf(value.into()));
        self.attach(Some(key), index)?;
        Ok(self)
    }

    /// Appends to the open array.
    pub fn push(&mut self, value: impl Into<Value>) -> Result<&mut Self, ReportError> {
        let index = self.alloc(Node::Leaf(value.into()));
        self.attach(None, index)?;
        Ok(self)
    }

    pub fn begin_object(&mut self, key: &str) -> Result<&mut Self, ReportError> {
        self.begin(Some(key), Node::Object(Vec::new()))
    }

    pub fn begin_array(&mut self, key: &str) -> Result<&mut Self, ReportError> {
        self.begin(Some(key), Node::Array(Vec::new()))
    }

    /// Opens an object inside the open array.
    pub fn push_object(&mut self) -> Result<&mut Self, ReportError> {
        self.begin(None, Node::Object(Vec::new()))
    }

    pub fn end(&mut self) -> Result<&mut Self, ReportError> {
        if self.open.len() <= 1 {
            return Err(ReportError::UnbalancedEnd);
        }
        self.open.pop();
        Ok(self)
    }

    pub fn finish(self) -> Result<Value, ReportError> {
        if self.open.len() != 1 {
            return Err(ReportError::Unclosed(self.open.len() - 1));
        }
        let mut nodes: Vec<Option<Node>> = self.nodes.into_iter().map(Some).collect();
        Ok(render(&mut nodes, 0))
    }

    fn begin(&mut self, key: Option<&str>, node: Node) -> Result<&mut Self, ReportError> {
        let index = self.alloc(node);
        self.attach(key, index)?;
        self.open.push(index);
        Ok(self)
    }

    fn alloc(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn attach(&mut self, key: Option<&str>, child: usize) -> Result<(), ReportError> {
        let parent = *self.open.last().ok_or(ReportError::UnbalancedEnd)?;
        match (&mut self.nodes[parent], key) {
            (Node::Object(entries), Some(key)) => {
                entries.push((key.to_string(), child));
                Ok(())
            }
            (Node::Array(items), None) => {
                items.push(child);
                Ok(())
            }
            _ => {
                // The child was the last allocation.
                self.nodes.truncate(child);
                Err(ReportError::WrongContainer)
            }
        }
    }
}

fn render(nodes: &mut [Option<Node>], index: usize) -> Value {
    match nodes[index].take() {
        Some(Node::Leaf(value)) => value,
        Some(Node::Object(entries)) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, child) in entries {
                let value = render(nodes, child);
                map.insert(key, value);
            }
            Value::Object(map)
        }
        Some(Node::Array(items)) => {
            Value::Array(items.into_iter().map(|child| render(nodes, child)).collect())
        }
        None => Value::Null,
    }
}
