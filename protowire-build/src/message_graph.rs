//! Recursion detection over the resolved message set.
//!
//! Writer types embed their message-typed fields by value, so a recursive or
//! co-recursive message nest would have infinite size in Rust. The graph has
//! an edge for every non-repeated message-typed field; a path from a field's
//! type back to its containing message means the field must be boxed.

use std::collections::HashMap;

use petgraph::algo::has_path_connecting;
use petgraph::graph::{Graph, NodeIndex};

use crate::ast::{FieldType, FileId, Label, Message, MessageField, ProtoFile, TypeKind};

pub struct MessageGraph {
    index: HashMap<(FileId, String), NodeIndex>,
    graph: Graph<(), ()>,
}

impl MessageGraph {
    /// Builds the graph from a resolved file set.
    pub fn new(files: &[ProtoFile]) -> MessageGraph {
        let mut graph = MessageGraph {
            index: HashMap::new(),
            graph: Graph::new(),
        };
        for (file_id, file) in files.iter().enumerate() {
            for message in &file.messages {
                graph.add_message(file_id, message);
            }
        }
        graph
    }

    fn node(&mut self, file: FileId, fq_name: &str) -> NodeIndex {
        let MessageGraph {
            ref mut index,
            ref mut graph,
        } = *self;
        *index
            .entry((file, fq_name.to_string()))
            .or_insert_with(|| graph.add_node(()))
    }

    fn add_message(&mut self, file: FileId, message: &Message) {
        let from = self.node(file, &message.fq_name);

        let mut add_field = |graph: &mut MessageGraph, typ: &FieldType, label: Label| {
            if label == Label::Repeated {
                return;
            }
            if let FieldType::Named(named) = typ {
                let type_ref = named.type_ref();
                if type_ref.kind == TypeKind::Message {
                    let to = graph.node(type_ref.file, &type_ref.fq_name);
                    graph.graph.add_edge(from, to, ());
                }
            }
        };

        for field in &message.fields {
            match field {
                MessageField::Normal(field) => add_field(self, &field.typ, field.label),
                // Map entries live behind a collection, like repeated fields.
                MessageField::Map(_) => {}
                MessageField::OneOf(oneof) => {
                    for field in &oneof.fields {
                        add_field(self, &field.typ, field.label);
                    }
                }
            }
        }

        for nested in &message.messages {
            self.add_message(file, nested);
        }
    }

    /// Whether a field of type `field_type` inside `container` closes a
    /// cycle and must therefore be boxed.
    pub fn must_box(
        &self,
        container: (FileId, &str),
        field_type: (FileId, &str),
    ) -> bool {
        let from = match self
            .index
            .get(&(field_type.0, field_type.1.to_string()))
        {
            Some(&node) => node,
            None => return false,
        };
        let to = match self.index.get(&(container.0, container.1.to_string())) {
            Some(&node) => node,
            None => return false,
        };
        has_path_connecting(&self.graph, from, to, None)
    }
}
