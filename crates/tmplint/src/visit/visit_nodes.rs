use super::Visit;
use crate::template::{Node, Root};

/// Recursively visit all [Node]s, parents before their children
pub trait VisitNodes {
    fn visit_nodes(&self, visitor: &mut dyn Visit<Node>);
}

impl VisitNodes for Root {
    fn visit_nodes(&self, visitor: &mut dyn Visit<Node>) {
        self.nodes.visit_nodes(visitor);
    }
}

impl VisitNodes for [Node] {
    fn visit_nodes(&self, visitor: &mut dyn Visit<Node>) {
        for node in self {
            node.visit_nodes(visitor);
        }
    }
}

impl VisitNodes for Option<Vec<Node>> {
    fn visit_nodes(&self, visitor: &mut dyn Visit<Node>) {
        if let Some(nodes) = self {
            nodes.visit_nodes(visitor);
        }
    }
}

impl VisitNodes for Node {
    fn visit_nodes(&self, visitor: &mut dyn Visit<Node>) {
        visitor.visit(self);

        match self {
            Node::If(node) => {
                for branch in &node.branches {
                    branch.body.visit_nodes(visitor);
                }
                node.otherwise.visit_nodes(visitor);
            }
            Node::Range(node) => {
                node.body.visit_nodes(visitor);
                node.otherwise.visit_nodes(visitor);
            }
            Node::With(node) => {
                node.body.visit_nodes(visitor);
                node.otherwise.visit_nodes(visitor);
            }
            Node::Define(node) => node.body.visit_nodes(visitor),
            Node::Text(_)
            | Node::Action(_)
            | Node::Bind(_)
            | Node::Include(_)
            | Node::Comment(_)
            | Node::Break(_)
            | Node::Continue(_) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::template::{parse, Delimiters};
    use pretty_assertions::assert_eq;

    #[test]
    fn visits_nested_nodes() {
        let parsed = parse(
            r#"{{ if .a }}{{ range .b }}{{ define "x" }}{{ .c }}{{ end }}{{ end }}{{ else }}{{ with .d }}{{ .e }}{{ end }}{{ end }}"#,
            &Delimiters::default(),
        );

        let mut kinds = vec![];
        parsed.root.visit_nodes(&mut |node: &Node| {
            kinds.push(match node {
                Node::If(_) => "if",
                Node::Range(_) => "range",
                Node::Define(_) => "define",
                Node::With(_) => "with",
                Node::Action(_) => "action",
                _ => "other",
            })
        });

        assert_eq!(
            kinds,
            vec!["if", "range", "define", "action", "with", "action"]
        );
    }
}
