//! Outline and markdown import.
//!
//! An outline is a small line-oriented description of a research pipeline:
//!
//! ```text
//! # comments start with '#'
//! step input "Raw images" as raw
//! step process "Augment" as aug
//! ref "Deep Residual Learning" year=2016 venue=CVPR as resnet
//! note "Check label noise"
//! pipe raw -> aug
//! cite resnet -> aug
//! tag aug "baseline"
//! ```
//!
//! Import produces plain [`Command`]s. Each one is applied to a scratch copy
//! of the graph as it is produced, so the first structurally invalid line is
//! reported with its line number and nothing reaches the real graph.

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use rflow_core::{
    CoreError, EdgeKind, ModuleType, Node, NodeId, NodeKind, Point, ReferenceMeta, SceneGraph,
};

use crate::command::Command;
use crate::error::ImportError;

/// Horizontal distance between imported nodes.
pub const COLUMN_SPACING: f64 = 250.0;

const STEP_ROW: f64 = 0.0;
const REFERENCE_ROW: f64 = 200.0;
const OTHER_ROW: f64 = 400.0;
const MARGIN: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Text(String),
    Pair(String, String),
}

#[derive(Debug)]
enum Directive {
    Node {
        node: Node,
        alias: Option<String>,
    },
    Link {
        kind: EdgeKind,
        from: String,
        to: String,
    },
    Tag {
        alias: String,
        name: String,
    },
}

fn syntax(line: usize, message: impl Into<String>) -> ImportError {
    ImportError::Syntax {
        line,
        message: message.into(),
    }
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>, line: usize) -> Result<String, ImportError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            Some('"') => return Ok(text),
            Some('\\') => match chars.next() {
                Some(c @ ('"' | '\\')) => text.push(c),
                Some('n') => text.push('\n'),
                Some(c) => {
                    text.push('\\');
                    text.push(c);
                }
                None => return Err(syntax(line, "unterminated string")),
            },
            Some(c) => text.push(c),
            None => return Err(syntax(line, "unterminated string")),
        }
    }
}

fn tokenize(source: &str, line: usize) -> Result<Vec<Token>, ImportError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            tokens.push(Token::Text(read_quoted(&mut chars, line)?));
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '"' {
                break;
            }
            word.push(c);
            chars.next();
        }
        match word.split_once('=') {
            Some((key, "")) if chars.peek() == Some(&'"') => {
                chars.next();
                let value = read_quoted(&mut chars, line)?;
                tokens.push(Token::Pair(key.to_string(), value));
            }
            Some((key, value)) if !key.is_empty() => {
                tokens.push(Token::Pair(key.to_string(), value.to_string()));
            }
            _ => tokens.push(Token::Word(word)),
        }
    }
    Ok(tokens)
}

/// Optional `key=value` pairs and a trailing `as <alias>`.
#[derive(Default)]
struct Trailer {
    alias: Option<String>,
    pairs: BTreeMap<String, String>,
}

fn parse_trailer(tokens: &[Token], line: usize) -> Result<Trailer, ImportError> {
    let mut trailer = Trailer::default();
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        match token {
            Token::Word(w) if w == "as" => match iter.next() {
                Some(Token::Word(alias)) => trailer.alias = Some(alias.clone()),
                _ => return Err(syntax(line, "expected an alias after 'as'")),
            },
            Token::Pair(key, value) => {
                trailer.pairs.insert(key.clone(), value.clone());
            }
            other => return Err(syntax(line, format!("unexpected {:?}", other))),
        }
    }
    Ok(trailer)
}

fn no_pairs(trailer: &Trailer, line: usize) -> Result<(), ImportError> {
    match trailer.pairs.keys().next() {
        Some(key) => Err(syntax(line, format!("unknown attribute '{}'", key))),
        None => Ok(()),
    }
}

fn text_arg(tokens: &[Token], index: usize, line: usize, what: &str) -> Result<String, ImportError> {
    match tokens.get(index) {
        Some(Token::Text(text)) => Ok(text.clone()),
        _ => Err(syntax(line, format!("expected quoted {}", what))),
    }
}

fn word_arg(tokens: &[Token], index: usize, line: usize, what: &str) -> Result<String, ImportError> {
    match tokens.get(index) {
        Some(Token::Word(word)) => Ok(word.clone()),
        _ => Err(syntax(line, format!("expected {}", what))),
    }
}

fn parse_line(tokens: &[Token], line: usize) -> Result<Directive, ImportError> {
    let keyword = word_arg(tokens, 0, line, "a directive")?;
    let origin = Point::default();
    match keyword.as_str() {
        "step" => {
            let module = word_arg(tokens, 1, line, "a module type")?;
            let module = ModuleType::parse(&module)
                .ok_or_else(|| syntax(line, format!("unknown module type '{}'", module)))?;
            let label = text_arg(tokens, 2, line, "label")?;
            let trailer = parse_trailer(&tokens[3..], line)?;
            no_pairs(&trailer, line)?;
            Ok(Directive::Node {
                node: Node::step(module, origin, label),
                alias: trailer.alias,
            })
        }
        "ref" => {
            let title = text_arg(tokens, 1, line, "title")?;
            let mut trailer = parse_trailer(&tokens[2..], line)?;
            let meta = ReferenceMeta {
                title,
                year: trailer.pairs.remove("year").unwrap_or_default(),
                venue: trailer.pairs.remove("venue").unwrap_or_default(),
                source_path: String::new(),
            };
            no_pairs(&trailer, line)?;
            Ok(Directive::Node {
                node: Node::reference(origin, meta),
                alias: trailer.alias,
            })
        }
        "note" | "formula" | "image" => {
            let content = text_arg(tokens, 1, line, "content")?;
            let trailer = parse_trailer(&tokens[2..], line)?;
            no_pairs(&trailer, line)?;
            let (kind, label) = match keyword.as_str() {
                "note" => (NodeKind::Note, "Note".to_string()),
                "formula" => (NodeKind::Formula, "Formula".to_string()),
                _ => (NodeKind::Image, file_label(&content)),
            };
            Ok(Directive::Node {
                node: Node::new(kind, origin, label).with_content(content),
                alias: trailer.alias,
            })
        }
        "pipe" | "cite" => {
            let from = word_arg(tokens, 1, line, "a source alias")?;
            if word_arg(tokens, 2, line, "'->'")? != "->" {
                return Err(syntax(line, "expected '->'"));
            }
            let to = word_arg(tokens, 3, line, "a target alias")?;
            if tokens.len() > 4 {
                return Err(syntax(line, "unexpected trailing input"));
            }
            let kind = if keyword == "pipe" {
                EdgeKind::Pipeline
            } else {
                EdgeKind::Reference
            };
            Ok(Directive::Link { kind, from, to })
        }
        "tag" => {
            let alias = word_arg(tokens, 1, line, "an alias")?;
            let name = text_arg(tokens, 2, line, "tag name")?;
            if tokens.len() > 3 {
                return Err(syntax(line, "unexpected trailing input"));
            }
            Ok(Directive::Tag { alias, name })
        }
        other => Err(syntax(line, format!("unknown directive '{}'", other))),
    }
}

fn file_label(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

/// Where imported content starts: right of everything already placed.
fn origin_x(graph: &SceneGraph) -> f64 {
    let nodes = graph.nodes().map(|n| n.position.x + n.size.width);
    let groups = graph.groups().map(|g| g.position.x + g.size.width);
    nodes
        .chain(groups)
        .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
        .map_or(0.0, |x| x + MARGIN)
}

/// Default drop point for a paper imported without a cursor position.
pub fn reference_position(graph: &SceneGraph) -> Point {
    Point::new(origin_x(graph), REFERENCE_ROW)
}

struct Importer {
    scratch: SceneGraph,
    commands: Vec<Command>,
    aliases: BTreeMap<String, NodeId>,
}

impl Importer {
    fn push(&mut self, command: Result<Command, CoreError>, line: usize) -> Result<(), ImportError> {
        let command = command.map_err(|source| ImportError::Invalid { line, source })?;
        command
            .apply_in_place(&mut self.scratch)
            .map_err(|source| ImportError::Invalid { line, source })?;
        self.commands.push(command);
        Ok(())
    }

    fn resolve(&self, alias: &str, line: usize) -> Result<NodeId, ImportError> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| ImportError::UnknownAlias {
                line,
                alias: alias.to_string(),
            })
    }
}

/// Translates an outline into commands that, applied in order to `graph`,
/// add its content. The session executes them as one batch.
pub fn import_outline(graph: &SceneGraph, text: &str) -> Result<Vec<Command>, ImportError> {
    let mut importer = Importer {
        scratch: graph.clone(),
        commands: Vec::new(),
        aliases: BTreeMap::new(),
    };
    let mut created: Vec<(NodeId, NodeKind)> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens = tokenize(trimmed, line)?;
        match parse_line(&tokens, line)? {
            Directive::Node { node, alias } => {
                if let Some(alias) = alias {
                    if importer.aliases.contains_key(&alias) {
                        return Err(ImportError::DuplicateAlias { line, alias });
                    }
                    importer.aliases.insert(alias, node.id);
                }
                created.push((node.id, node.kind));
                let command = Command::create_node(&importer.scratch, node, None);
                importer.push(command, line)?;
            }
            Directive::Link { kind, from, to } => {
                let source = importer.resolve(&from, line)?;
                let target = importer.resolve(&to, line)?;
                let command = Command::create_edge(&importer.scratch, kind, source, target);
                importer.push(command, line)?;
            }
            Directive::Tag { alias, name } => {
                let node = importer.resolve(&alias, line)?;
                let existing = importer.scratch.tags().find_by_name(&name).map(|t| t.id);
                let tag = match existing {
                    Some(tag) => tag,
                    None => {
                        let command = Command::create_tag(&importer.scratch, &name, None);
                        importer.push(command, line)?;
                        match importer.commands.last() {
                            Some(Command::TagCreate { tag, .. }) => tag.id,
                            _ => return Err(syntax(line, "tag was not created")),
                        }
                    }
                };
                let command = Command::assign_tag(&importer.scratch, node, tag);
                importer.push(command, line)?;
            }
        }
    }

    if importer.commands.is_empty() {
        return Err(ImportError::Empty);
    }

    let positions = layout(graph, &importer.scratch, &created);
    for command in importer.commands.iter_mut() {
        if let Command::CreateNode { node, .. } = command {
            if let Some(position) = positions.get(&node.id) {
                node.position = *position;
            }
        }
    }
    Ok(importer.commands)
}

/// Pipeline steps along the top row in data-flow order, references below
/// them, everything else on a third row.
fn layout(graph: &SceneGraph, scratch: &SceneGraph, created: &[(NodeId, NodeKind)]) -> BTreeMap<NodeId, Point> {
    let x0 = origin_x(graph);
    let steps: Vec<NodeId> = created
        .iter()
        .filter(|(_, kind)| kind.is_pipeline_step())
        .map(|(id, _)| *id)
        .collect();
    let ordered: Vec<NodeId> = match scratch.pipeline_order() {
        Ok(order) => order.into_iter().filter(|id| steps.contains(id)).collect(),
        Err(_) => steps,
    };

    let mut positions = BTreeMap::new();
    for (i, id) in ordered.iter().enumerate() {
        positions.insert(*id, Point::new(x0 + i as f64 * COLUMN_SPACING, STEP_ROW));
    }
    let (mut refs, mut others) = (0usize, 0usize);
    for (id, kind) in created {
        if kind.is_pipeline_step() {
            continue;
        }
        let (row, column) = if kind.is_reference() {
            refs += 1;
            (REFERENCE_ROW, refs - 1)
        } else {
            others += 1;
            (OTHER_ROW, others - 1)
        };
        positions.insert(*id, Point::new(x0 + column as f64 * COLUMN_SPACING, row));
    }
    positions
}

/// Title of a markdown paper: its first `# ` heading, else the file stem
/// with separators turned into spaces and each word capitalized.
pub fn markdown_title(file_name: &str, content: &str) -> String {
    let heading = content
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(heading) = heading {
        return heading.to_string();
    }

    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A reference node for a dropped markdown paper. `source_path` is the
/// project-relative location of the stored copy, if any.
pub fn markdown_reference(
    graph: &SceneGraph,
    file_name: &str,
    content: &str,
    position: Point,
    source_path: &str,
) -> Result<Command, CoreError> {
    let meta = ReferenceMeta {
        title: markdown_title(file_name, content),
        source_path: source_path.to_string(),
        ..Default::default()
    };
    let node = Node::reference(position, meta).with_content(content);
    Command::create_node(graph, node, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTLINE: &str = r#"
# A tiny pipeline
step output "Report" as report
step input "Raw images" as raw
step process "Augment" as aug
ref "Deep Residual Learning" year=2016 venue="CVPR 2016" as resnet
note "Check \"label\" noise"
pipe raw -> aug
pipe aug -> report
cite resnet -> aug
tag aug "baseline"
tag raw "baseline"
"#;

    fn apply_all(graph: &mut SceneGraph, commands: &[Command]) {
        for command in commands {
            command.apply(graph).unwrap();
        }
    }

    #[test]
    fn tokenizer_handles_quotes_and_pairs() {
        let tokens = tokenize(r#"ref "A \"B\"" venue="X Y" year=2020 as a"#, 1).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("ref".into()),
                Token::Text("A \"B\"".into()),
                Token::Pair("venue".into(), "X Y".into()),
                Token::Pair("year".into(), "2020".into()),
                Token::Word("as".into()),
                Token::Word("a".into()),
            ]
        );
        assert!(matches!(
            tokenize(r#"note "open"#, 7),
            Err(ImportError::Syntax { line: 7, .. })
        ));
    }

    #[test]
    fn outline_builds_nodes_edges_and_tags() {
        let mut graph = SceneGraph::new();
        let commands = import_outline(&graph, OUTLINE).unwrap();
        apply_all(&mut graph, &commands);

        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.tags().len(), 1);
        let tag = graph.tags().iter().next().unwrap().id;
        assert_eq!(graph.tag_holders(tag).len(), 2);

        let resnet = graph.nodes().find(|n| n.kind.is_reference()).unwrap();
        let meta = resnet.reference.as_ref().unwrap();
        assert_eq!(meta.venue, "CVPR 2016");
        assert_eq!(resnet.position.y, REFERENCE_ROW);
    }

    #[test]
    fn steps_are_laid_out_in_flow_order() {
        let mut graph = SceneGraph::new();
        let commands = import_outline(&graph, OUTLINE).unwrap();
        apply_all(&mut graph, &commands);

        let x_of = |label: &str| graph.nodes().find(|n| n.label == label).unwrap().position.x;
        assert!(x_of("Raw images") < x_of("Augment"));
        assert!(x_of("Augment") < x_of("Report"));
    }

    #[test]
    fn import_lands_right_of_existing_content() {
        let mut graph = SceneGraph::new();
        graph
            .insert_node(Node::step(ModuleType::Input, Point::new(1000.0, 0.0), "existing"))
            .unwrap();
        let commands = import_outline(&graph, "note \"n\"").unwrap();
        match &commands[0] {
            Command::CreateNode { node, .. } => assert!(node.position.x > 1000.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn pipeline_into_reference_reports_line() {
        let text = "step input \"a\" as a\nref \"paper\" as p\n\npipe a -> p\n";
        let err = import_outline(&SceneGraph::new(), text).unwrap_err();
        assert!(matches!(err, ImportError::Invalid { line: 4, .. }));
        assert_eq!(err.line(), Some(4));
    }

    #[test]
    fn alias_errors() {
        let graph = SceneGraph::new();
        assert!(matches!(
            import_outline(&graph, "pipe x -> y"),
            Err(ImportError::UnknownAlias { line: 1, .. })
        ));
        assert!(matches!(
            import_outline(&graph, "note \"a\" as n\nnote \"b\" as n"),
            Err(ImportError::DuplicateAlias { line: 2, .. })
        ));
    }

    #[test]
    fn syntax_errors() {
        let graph = SceneGraph::new();
        for bad in [
            "step sink \"x\"",
            "frobnicate",
            "step input label",
            "pipe a b",
            "note \"x\" color=red",
        ] {
            assert!(
                matches!(import_outline(&graph, bad), Err(ImportError::Syntax { line: 1, .. })),
                "accepted {:?}",
                bad
            );
        }
        assert!(matches!(
            import_outline(&graph, "# only a comment\n\n"),
            Err(ImportError::Empty)
        ));
    }

    #[test]
    fn markdown_titles() {
        assert_eq!(
            markdown_title("x.md", "intro\n# Attention Is All You Need\n"),
            "Attention Is All You Need"
        );
        assert_eq!(markdown_title("graph_neural-nets.md", "no heading"), "Graph Neural Nets");

        let graph = SceneGraph::new();
        let cmd = markdown_reference(&graph, "a.md", "# T", Point::default(), "assets/papers/a.md")
            .unwrap();
        match cmd {
            Command::CreateNode { node, .. } => {
                assert_eq!(node.label, "T");
                assert_eq!(node.reference.unwrap().source_path, "assets/papers/a.md");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reference_position_clears_existing_content() {
        let mut graph = SceneGraph::new();
        assert_eq!(reference_position(&graph), Point::new(0.0, REFERENCE_ROW));

        let node = Node::step(ModuleType::Process, Point::new(40.0, 0.0), "a");
        let right = 40.0 + node.size.width;
        graph.insert_node(node).unwrap();
        let at = reference_position(&graph);
        assert_eq!(at.x, right + MARGIN);
        assert_eq!(at.y, REFERENCE_ROW);
    }
}
