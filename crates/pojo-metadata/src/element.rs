//! Metadata element tree
//!
//! Trees can be arbitrarily deep, so everything that walks a whole tree here
//! (cloning, dropping, comparing, printing, serializing, measuring) uses an
//! explicit stack.
//!
//! The serialized form of an [`Element`] is flat: the element's own name,
//! namespace and attributes, then every descendant in document order with
//! the index of its parent in that list (`null` for the element itself).

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt::{self, Write as _};

/// A `$namespace:name=value` attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Attribute {
    name: String,
    namespace: String,
    value: String,
}

impl Attribute {
    /// Attribute in the default namespace
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_namespace("", name, value)
    }

    /// Attribute in a namespace (empty means default)
    pub fn with_namespace(
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            value: value.into(),
        }
    }

    /// Local name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, empty for the default namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Value
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A metadata element: a name, attributes and ordered child elements
pub struct Element {
    name: String,
    namespace: String,
    attributes: Vec<Attribute>,
    elements: Vec<Element>,
}

impl Element {
    /// Element in the default namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_namespace("", name)
    }

    /// Element in a namespace (empty means default)
    pub fn with_namespace(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            attributes: Vec::new(),
            elements: Vec::new(),
        }
    }

    /// Local name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, empty for the default namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `namespace:name`, or just `name` in the default namespace
    pub fn qualified_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Child elements in declaration order
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Append an attribute
    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Append a child element
    pub fn add_element(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// Builder form of [`Element::add_attribute`]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.add_attribute(attribute);
        self
    }

    /// Builder form of [`Element::add_element`]
    pub fn with_element(mut self, element: Element) -> Self {
        self.add_element(element);
        self
    }

    /// Value of the first default-namespace attribute called `name`
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attribute_ns("", name)
    }

    /// Value of the first attribute with this namespace and name
    pub fn attribute_ns(&self, namespace: &str, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name && a.namespace == namespace)
            .map(Attribute::value)
    }

    /// Whether a default-namespace attribute called `name` exists
    pub fn contains_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Direct children in the default namespace called `name`
    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements_named_ns("", name)
    }

    /// Direct children with this namespace and name
    pub fn elements_named_ns<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements
            .iter()
            .filter(move |e| e.name == name && e.namespace == namespace)
    }

    /// Whether a direct default-namespace child called `name` exists
    pub fn contains_element(&self, name: &str) -> bool {
        self.elements_named(name).next().is_some()
    }

    /// Distinct non-empty namespaces used anywhere in this subtree (elements
    /// and attributes), in first-seen order
    pub fn namespaces(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        let mut note = |ns: &str| {
            if !ns.is_empty() && !seen.iter().any(|s| s == ns) {
                seen.push(ns.to_owned());
            }
        };
        let mut stack = vec![self];
        while let Some(element) = stack.pop() {
            note(&element.namespace);
            for attribute in &element.attributes {
                note(&attribute.namespace);
            }
            stack.extend(element.elements.iter().rev());
        }
        seen
    }

    /// Copy of this element without its children
    fn shallow_clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            attributes: self.attributes.clone(),
            elements: Vec::new(),
        }
    }

    /// Every descendant in document order, each with its parent's index
    fn descendants(&self) -> Vec<Node<'_>> {
        let mut nodes = Vec::new();
        let mut stack: Vec<(&Element, Option<usize>)> =
            self.elements.iter().rev().map(|e| (e, None)).collect();
        while let Some((element, parent)) = stack.pop() {
            let index = nodes.len();
            nodes.push(Node {
                name: &element.name,
                namespace: &element.namespace,
                attributes: &element.attributes,
                parent,
            });
            stack.extend(element.elements.iter().rev().map(|e| (e, Some(index))));
        }
        nodes
    }

    /// Height of this subtree (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((element, depth)) = stack.pop() {
            max = max.max(depth);
            stack.extend(element.elements.iter().map(|e| (e, depth + 1)));
        }
        max
    }

    /// Print in the textual metadata form, e.g.
    /// `ns:name { $ns:attr=value child { } }`
    ///
    /// Parsing the output yields an equal tree.
    pub fn to_manifest_string(&self) -> String {
        let mut out = String::new();
        // (element, index of the next child to print)
        let mut stack: Vec<(&Element, usize)> = vec![(self, 0)];
        open(&mut out, self);
        while let Some(top) = stack.last_mut() {
            let element: &Element = top.0;
            let index = top.1;
            top.1 += 1;
            match element.elements.get(index) {
                Some(child) => {
                    out.push(' ');
                    open(&mut out, child);
                    stack.push((child, 0));
                }
                None => {
                    out.push_str(" }");
                    stack.pop();
                }
            }
        }
        out
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{}:{}", namespace, name)
    }
}

fn open(out: &mut String, element: &Element) {
    out.push_str(&element.qualified_name());
    out.push_str(" {");
    for attribute in &element.attributes {
        let _ = write!(
            out,
            " ${}={}",
            qualify(&attribute.namespace, &attribute.name),
            attribute.value
        );
    }
}

/// Serialized descendant of an element
#[derive(Serialize)]
struct Node<'a> {
    name: &'a str,
    namespace: &'a str,
    attributes: &'a [Attribute],
    parent: Option<usize>,
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Element", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("namespace", &self.namespace)?;
        state.serialize_field("attributes", &self.attributes)?;
        state.serialize_field("descendants", &self.descendants())?;
        state.end()
    }
}

impl Clone for Element {
    fn clone(&self) -> Self {
        // (source, copy holding the children cloned so far)
        let mut stack: Vec<(&Element, Element)> = vec![(self, self.shallow_clone())];
        let mut root = None;
        while let Some((source, copy)) = stack.pop() {
            match source.elements.get(copy.elements.len()) {
                Some(child) => {
                    let child_copy = child.shallow_clone();
                    stack.push((source, copy));
                    stack.push((child, child_copy));
                }
                None => match stack.last_mut() {
                    Some((_, parent)) => parent.elements.push(copy),
                    None => root = Some(copy),
                },
            }
        }
        root.unwrap_or_else(|| self.shallow_clone())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_manifest_string();
        f.debug_tuple("Element")
            .field(&format_args!("{}", text))
            .finish()
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.name != b.name
                || a.namespace != b.namespace
                || a.attributes != b.attributes
                || a.elements.len() != b.elements.len()
            {
                return false;
            }
            stack.extend(a.elements.iter().zip(&b.elements));
        }
        true
    }
}

impl Eq for Element {}

impl Drop for Element {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.elements);
        while let Some(mut element) = stack.pop() {
            stack.append(&mut element.elements);
        }
    }
}
