use common::key_index_vec::{KeyIndexKey, KeyIndexVec};
use common::{id_type, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::param::ParamTable;
use crate::signal::{PortIndex, SignalDomain};
use crate::transform::{PortSpec, TransformDef, TransformId};

id_type!(BlockId);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Block {0} is not part of the graph")]
    UnknownBlock(BlockId),
    #[error("Block {0} is already part of the graph")]
    DuplicateBlock(BlockId),
    #[error("Block {block_id} has no {direction:?} port {port}")]
    PortOutOfRange {
        block_id: BlockId,
        direction: PortDirection,
        port: PortIndex,
    },
    #[error("Input port {port} of block {block_id} is already connected")]
    InputAlreadyConnected { block_id: BlockId, port: PortIndex },
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,
    pub index: PortIndex,
    pub domain: SignalDomain,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub block_id: BlockId,
    pub port: PortIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: PortRef,
    pub to: PortRef,
    /// Declared by the schematic author; the validator decides whether the edge really closes a
    /// cycle.
    #[serde(default)]
    pub feedback: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub transform_id: TransformId,

    #[serde(default)]
    pub inputs: Vec<Port>,
    #[serde(default)]
    pub outputs: Vec<Port>,
    #[serde(default)]
    pub params: ParamTable,

    #[serde(default)]
    pub feedback_enabled: bool,
    #[serde(default = "one")]
    pub segment_count: usize,
}

/// Blocks in creation order plus the signal links between their ports.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub blocks: KeyIndexVec<BlockId, Block>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

fn one() -> usize {
    1
}

impl Port {
    fn from_spec(spec: &PortSpec, direction: PortDirection, index: PortIndex) -> Port {
        Port {
            name: spec.name.clone(),
            direction,
            index,
            domain: spec.domain,
            optional: spec.optional,
        }
    }
}

impl From<(BlockId, PortIndex)> for PortRef {
    fn from((block_id, port): (BlockId, PortIndex)) -> Self {
        PortRef { block_id, port }
    }
}

impl KeyIndexKey<BlockId> for Block {
    fn key(&self) -> &BlockId {
        &self.id
    }
}

impl From<&TransformDef> for Block {
    fn from(def: &TransformDef) -> Self {
        let inputs = def
            .inputs
            .iter()
            .enumerate()
            .map(|(idx, spec)| Port::from_spec(spec, PortDirection::Input, idx))
            .collect();
        let outputs = def
            .outputs
            .iter()
            .enumerate()
            .map(|(idx, spec)| Port::from_spec(spec, PortDirection::Output, idx))
            .collect();

        Block {
            id: BlockId::unique(),
            name: def.name.clone(),
            transform_id: def.id,
            inputs,
            outputs,
            params: def.default_params.clone(),
            feedback_enabled: false,
            segment_count: 1,
        }
    }
}

impl Block {
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_id(mut self, id: BlockId) -> Self {
        self.id = id;
        self
    }

    /// Opts the block into segmented feedback convergence with `segment_count` passes.
    pub fn with_feedback(mut self, segment_count: usize) -> Self {
        self.feedback_enabled = true;
        self.segment_count = segment_count;
        self
    }

    pub fn port(&self, direction: PortDirection, port: PortIndex) -> Option<&Port> {
        match direction {
            PortDirection::Input => self.inputs.get(port),
            PortDirection::Output => self.outputs.get(port),
        }
    }
}

impl Edge {
    pub fn new(from: impl Into<PortRef>, to: impl Into<PortRef>) -> Self {
        Edge {
            from: from.into(),
            to: to.into(),
            feedback: false,
        }
    }
}

impl Graph {
    pub fn add(&mut self, block: Block) -> Result<BlockId> {
        assert!(!block.id.is_nil());
        let id = block.id;
        if !self.blocks.push(block) {
            return Err(GraphError::DuplicateBlock(id));
        }
        Ok(id)
    }

    pub fn remove_by_id(&mut self, id: BlockId) -> Option<Block> {
        let removed = self.blocks.remove_by_key(&id)?;
        self.edges
            .retain(|edge| edge.from.block_id != id && edge.to.block_id != id);
        Some(removed)
    }

    /// Links output `from` to input `to`. An input port accepts a single edge.
    pub fn connect(&mut self, from: impl Into<PortRef>, to: impl Into<PortRef>) -> Result<usize> {
        self.link(Edge::new(from, to))
    }

    /// Like [`Graph::connect`], marking the link as the one closing a feedback loop.
    pub fn connect_feedback(
        &mut self,
        from: impl Into<PortRef>,
        to: impl Into<PortRef>,
    ) -> Result<usize> {
        let mut edge = Edge::new(from, to);
        edge.feedback = true;
        self.link(edge)
    }

    fn link(&mut self, edge: Edge) -> Result<usize> {
        self.check_port(&edge.from, PortDirection::Output)?;
        self.check_port(&edge.to, PortDirection::Input)?;

        if self.incoming(&edge.to).is_some() {
            return Err(GraphError::InputAlreadyConnected {
                block_id: edge.to.block_id,
                port: edge.to.port,
            });
        }

        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    pub fn check_port(&self, port_ref: &PortRef, direction: PortDirection) -> Result<&Port> {
        let block = self
            .by_id(&port_ref.block_id)
            .ok_or(GraphError::UnknownBlock(port_ref.block_id))?;

        block
            .port(direction, port_ref.port)
            .ok_or(GraphError::PortOutOfRange {
                block_id: port_ref.block_id,
                direction,
                port: port_ref.port,
            })
    }

    pub fn incoming(&self, to: &PortRef) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.to == *to)
    }

    pub fn by_id(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.by_key(id)
    }

    pub fn by_id_mut(&mut self, id: &BlockId) -> Option<&mut Block> {
        self.blocks.by_key_mut(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Block> {
        assert!(!name.is_empty());
        self.blocks.iter().find(|block| block.name == name)
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Block> {
        assert!(!name.is_empty());
        self.blocks.iter_mut().find(|block| block.name == name)
    }

    pub fn creation_index(&self, id: &BlockId) -> Option<usize> {
        self.blocks.index_of_key(id)
    }

    pub fn serialize(&self, format: FileFormat) -> common::Result<String> {
        common::serialize(self, format)
    }

    pub fn deserialize(serialized: &str, format: FileFormat) -> common::Result<Graph> {
        common::deserialize(serialized, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{test_chain_graph, test_lib};

    #[test]
    fn block_id_parses_from_display() {
        let id = BlockId::unique();

        let parsed: BlockId = id.to_string().parse().unwrap();

        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<BlockId>().is_err());
    }

    #[test]
    fn connect_rejects_second_edge_on_input() {
        let mut graph = test_chain_graph(&[1.0, 2.0]);
        let source = graph.by_name("source").unwrap().id;
        let negate = graph.by_name("negate").unwrap().id;

        let result = graph.connect((source, 0), (negate, 0));
        assert_eq!(
            result,
            Err(GraphError::InputAlreadyConnected {
                block_id: negate,
                port: 0
            })
        );
    }

    #[test]
    fn connect_checks_ports() {
        let mut graph = test_chain_graph(&[1.0]);
        let source = graph.by_name("source").unwrap().id;
        let negate = graph.by_name("negate").unwrap().id;

        assert!(matches!(
            graph.connect((source, 3), (negate, 0)),
            Err(GraphError::PortOutOfRange {
                direction: PortDirection::Output,
                port: 3,
                ..
            })
        ));

        let stranger = BlockId::unique();
        assert_eq!(
            graph.connect((stranger, 0), (negate, 0)),
            Err(GraphError::UnknownBlock(stranger))
        );
    }

    #[test]
    fn block_copies_ports_from_transform() {
        let lib = test_lib();
        let fork = lib.by_name("fork").unwrap();
        let block = Block::from(fork).named("split");

        assert_eq!(block.inputs.len(), 1);
        assert_eq!(block.outputs.len(), 2);
        assert_eq!(block.outputs[1].index, 1);
        assert_eq!(block.outputs[1].direction, PortDirection::Output);
        assert_eq!(block.segment_count, 1);
        assert!(!block.feedback_enabled);
    }

    #[test]
    fn remove_drops_attached_edges() {
        let mut graph = test_chain_graph(&[1.0]);
        let source = graph.by_name("source").unwrap().id;

        graph.remove_by_id(source);

        assert!(graph.by_name("source").is_none());
        assert!(graph.edges.is_empty());
        assert_eq!(graph.creation_index(&graph.by_name("negate").unwrap().id), Some(0));
    }

    #[test]
    fn roundtrip_serialization() -> anyhow::Result<()> {
        let graph = test_chain_graph(&[1.0, 2.0, 3.0, 4.0]);

        for format in FileFormat::all() {
            let serialized = graph.serialize(format)?;
            let deserialized = Graph::deserialize(&serialized, format)?;
            assert_eq!(deserialized, graph);
            assert_eq!(deserialized.serialize(format)?, serialized);
        }

        Ok(())
    }
}
