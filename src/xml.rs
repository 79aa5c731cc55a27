use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::ParseError;

#[derive(Debug)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Element tree stored in document order, each node knowing its parent.
#[derive(Debug)]
pub(crate) struct XmlDocument {
    nodes: Vec<Node>,
}

impl XmlDocument {
    pub fn parse(xml: &str, page: &str) -> Result<Self, ParseError> {
        let malformed = |message: String| ParseError::MalformedXml {
            page: page.to_string(),
            message,
        };

        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<usize> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let idx = push_node(&mut nodes, &stack, &e).map_err(malformed)?;
                    stack.push(idx);
                }
                Ok(Event::Empty(e)) => {
                    push_node(&mut nodes, &stack, &e).map_err(malformed)?;
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    if let Some(&open) = stack.last() {
                        let text = t
                            .unescape()
                            .map(|s| s.into_owned())
                            .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                        nodes[open].text.push_str(&text);
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some(&open) = stack.last() {
                        nodes[open].text.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Ok(Event::Eof) => break,
                Err(err) => return Err(malformed(err.to_string())),
                _ => {}
            }
            buf.clear();
        }

        if let Some(&open) = stack.last() {
            return Err(malformed(format!("unclosed element <{}>", nodes[open].name)));
        }
        if nodes.is_empty() {
            return Err(malformed("no elements".to_string()));
        }

        Ok(Self { nodes })
    }

    /// All elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeRef<'_>> {
        (0..self.nodes.len()).map(move |idx| NodeRef { doc: self, idx })
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        self.elements().filter(move |n| n.name() == name)
    }
}

fn push_node(nodes: &mut Vec<Node>, stack: &[usize], e: &BytesStart<'_>) -> Result<usize, String> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        attrs.push((key, value));
    }

    let idx = nodes.len();
    let parent = stack.last().copied();
    nodes.push(Node {
        name,
        attrs,
        text: String::new(),
        parent,
        children: Vec::new(),
    });
    if let Some(p) = parent {
        nodes[p].children.push(idx);
    }
    Ok(idx)
}

#[derive(Clone, Copy)]
pub(crate) struct NodeRef<'a> {
    doc: &'a XmlDocument,
    idx: usize,
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.doc, other.doc) && self.idx == other.idx
    }
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a Node {
        &self.doc.nodes[self.idx]
    }

    pub fn name(&self) -> &'a str {
        &self.node().name
    }

    pub fn attr(&self, key: &str) -> Option<&'a str> {
        self.node()
            .attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value, treating a blank value as absent.
    pub fn non_empty_attr(&self, key: &str) -> Option<&'a str> {
        self.attr(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn text(&self) -> &'a str {
        self.node().text.trim()
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.node().parent.map(|idx| NodeRef { doc: self.doc, idx })
    }

    pub fn ancestors(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        std::iter::successors(self.parent(), |n| n.parent())
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let doc = self.doc;
        self.node()
            .children
            .iter()
            .map(move |&idx| NodeRef { doc, idx })
    }

    /// Every element below this one, in document order.
    pub fn descendants(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let doc = self.doc;
        let start = self.idx;
        (start + 1..doc.nodes.len())
            .map(move |idx| NodeRef { doc, idx })
            .take_while(move |n| n.ancestors().any(|a| a.idx == start))
    }

    /// Siblings that appear before this node, nearest first.
    pub fn preceding_siblings(&self) -> impl Iterator<Item = NodeRef<'a>> + 'a {
        let doc = self.doc;
        let idx = self.idx;
        let siblings: &'a [usize] = match self.node().parent {
            Some(p) => &doc.nodes[p].children,
            None => &[],
        };
        let pos = siblings.iter().position(|&s| s == idx).unwrap_or(0);
        siblings[..pos]
            .iter()
            .rev()
            .map(move |&idx| NodeRef { doc, idx })
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.name())
    }
}
