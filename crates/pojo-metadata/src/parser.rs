//! Metadata tree parser
//!
//! Grammar (tokens separated by whitespace):
//!
//! ```text
//! element   := [namespace ':'] name '{' (attribute | element)* '}'
//! attribute := '$' [namespace ':'] name '=' value
//! ```
//!
//! The namespace is everything before the last `:`. Values run to the next
//! whitespace; there is no quoting or escaping.

use crate::cursor::Cursor;
use crate::element::{Attribute, Element};
use thiserror::Error;

/// Name of the synthetic root produced by [`parse_header`]
pub const HEADER_ROOT: &str = "iPOJO";

/// Malformed metadata
///
/// Every variant carries the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// No element at all
    #[error("Empty metadata at offset {offset}")]
    Empty {
        /// Byte offset where parsing stopped
        offset: usize,
    },

    /// `}` with no open element
    #[error("Unmatched '}}' at offset {offset}")]
    UnmatchedClose {
        /// Byte offset where parsing stopped
        offset: usize,
    },

    /// Input ended with elements still open
    #[error("Element '{name}' is not closed at offset {offset}")]
    Unterminated {
        /// Byte offset where parsing stopped
        offset: usize,
        /// Qualified name of the innermost open element
        name: String,
    },

    /// Attribute without `=`
    #[error("Attribute without '=' at offset {offset}")]
    MissingEquals {
        /// Byte offset where parsing stopped
        offset: usize,
    },

    /// Element name not followed by `{`
    #[error("Expected '{{' after element '{name}' at offset {offset}")]
    MissingOpenBrace {
        /// Byte offset where parsing stopped
        offset: usize,
        /// Name read before the missing brace
        name: String,
    },

    /// Attribute with no enclosing element
    #[error("Attribute outside of any element at offset {offset}")]
    AttributeOutsideElement {
        /// Byte offset where parsing stopped
        offset: usize,
    },

    /// Empty element or attribute name
    #[error("Empty name at offset {offset}")]
    EmptyName {
        /// Byte offset where parsing stopped
        offset: usize,
    },

    /// A second top-level element where exactly one is expected
    #[error("More than one root element, second starts at offset {offset}")]
    MultipleRoots {
        /// Byte offset where parsing stopped
        offset: usize,
    },

    /// Input ends in the middle of a token
    #[error("Truncated metadata at offset {offset}")]
    Truncated {
        /// Byte offset where parsing stopped
        offset: usize,
    },
}

impl MetadataError {
    /// Byte offset where parsing stopped
    pub fn offset(&self) -> usize {
        match self {
            MetadataError::Empty { offset }
            | MetadataError::UnmatchedClose { offset }
            | MetadataError::Unterminated { offset, .. }
            | MetadataError::MissingEquals { offset }
            | MetadataError::MissingOpenBrace { offset, .. }
            | MetadataError::AttributeOutsideElement { offset }
            | MetadataError::EmptyName { offset }
            | MetadataError::MultipleRoots { offset }
            | MetadataError::Truncated { offset } => *offset,
        }
    }
}

/// Parse text describing exactly one root element
pub fn parse(text: &str) -> Result<Element, MetadataError> {
    let mut roots = parse_roots(text, true)?;
    match roots.pop() {
        Some(root) => Ok(root),
        None => Err(MetadataError::Empty {
            offset: text.len(),
        }),
    }
}

/// Parse a manifest header holding any number of top-level elements and
/// wrap them under a synthetic `iPOJO` root
pub fn parse_header(text: &str) -> Result<Element, MetadataError> {
    let mut root = Element::new(HEADER_ROOT);
    for element in parse_roots(text, false)? {
        root.add_element(element);
    }
    Ok(root)
}

fn split_qualified(token: &str) -> (&str, &str) {
    token.rsplit_once(':').unwrap_or(("", token))
}

fn parse_roots(text: &str, single_root: bool) -> Result<Vec<Element>, MetadataError> {
    let mut cursor = Cursor::new(text);
    let mut stack: Vec<Element> = Vec::new();
    let mut roots: Vec<Element> = Vec::new();

    loop {
        cursor.skip_whitespace();
        let offset = cursor.position();
        let Some(c) = cursor.peek() else { break };

        match c {
            '}' => {
                cursor.advance();
                let done = stack.pop().ok_or(MetadataError::UnmatchedClose { offset })?;
                match stack.last_mut() {
                    Some(parent) => parent.add_element(done),
                    None => roots.push(done),
                }
            }
            '{' => return Err(MetadataError::EmptyName { offset }),
            '$' => {
                cursor.advance();
                let target = stack
                    .last_mut()
                    .ok_or(MetadataError::AttributeOutsideElement { offset })?;
                let token = cursor.take_until(&[]);
                if token.is_empty() && cursor.is_at_end() {
                    return Err(MetadataError::Truncated {
                        offset: cursor.position(),
                    });
                }
                let (key, value) = token.split_once('=').ok_or(MetadataError::MissingEquals {
                    offset: cursor.position(),
                })?;
                let (namespace, name) = split_qualified(key);
                if name.is_empty() {
                    return Err(MetadataError::EmptyName { offset: offset + 1 });
                }
                target.add_attribute(Attribute::with_namespace(namespace, name, value));
            }
            _ => {
                if single_root && stack.is_empty() && !roots.is_empty() {
                    return Err(MetadataError::MultipleRoots { offset });
                }
                let token = cursor.take_until(&['{', '}']);
                let (namespace, name) = split_qualified(token);
                if name.is_empty() {
                    return Err(MetadataError::EmptyName { offset });
                }
                cursor.skip_whitespace();
                match cursor.peek() {
                    Some('{') => {
                        cursor.advance();
                    }
                    None => {
                        return Err(MetadataError::Truncated {
                            offset: cursor.position(),
                        })
                    }
                    Some(_) => {
                        return Err(MetadataError::MissingOpenBrace {
                            offset: cursor.position(),
                            name: token.to_owned(),
                        })
                    }
                }
                stack.push(Element::with_namespace(namespace, name));
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(MetadataError::Unterminated {
            offset: text.len(),
            name: open.qualified_name(),
        });
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced_attribute_and_child() {
        let root = parse("Foo { $x:a=1 bar { } }").unwrap();
        assert_eq!(root.name(), "Foo");
        assert_eq!(root.namespace(), "");
        assert_eq!(root.attributes().len(), 1);
        let attribute = &root.attributes()[0];
        assert_eq!(
            (attribute.namespace(), attribute.name(), attribute.value()),
            ("x", "a", "1")
        );
        assert_eq!(root.elements().len(), 1);
        let bar = &root.elements()[0];
        assert_eq!(bar.name(), "bar");
        assert!(bar.attributes().is_empty());
        assert!(bar.elements().is_empty());
    }

    #[test]
    fn test_whitespace_is_flexible() {
        let root = parse("\n  ns:Foo{\t$a=1\n\n  bar {}}  ").unwrap();
        assert_eq!(root.namespace(), "ns");
        assert_eq!(root.attribute("a"), Some("1"));
        assert_eq!(root.elements()[0].name(), "bar");
    }

    #[test]
    fn test_namespace_splits_on_last_colon() {
        let root = parse("a:b:c { $d:e:f=g:h=i }").unwrap();
        assert_eq!((root.namespace(), root.name()), ("a:b", "c"));
        let attribute = &root.attributes()[0];
        assert_eq!(attribute.namespace(), "d:e");
        assert_eq!(attribute.name(), "f");
        assert_eq!(attribute.value(), "g:h=i");
    }

    #[test]
    fn test_empty_value_is_allowed() {
        let root = parse("Foo { $a= }").unwrap();
        assert_eq!(root.attribute("a"), Some(""));
    }

    #[test]
    fn test_errors_carry_offsets() {
        assert_eq!(parse(""), Err(MetadataError::Empty { offset: 0 }));
        assert_eq!(parse("   "), Err(MetadataError::Empty { offset: 3 }));
        assert_eq!(parse("}"), Err(MetadataError::UnmatchedClose { offset: 0 }));
        assert_eq!(
            parse("Foo { bar {"),
            Err(MetadataError::Unterminated {
                offset: 11,
                name: "bar".into()
            })
        );
        assert_eq!(
            parse("Foo { $a }"),
            Err(MetadataError::MissingEquals { offset: 8 })
        );
        assert_eq!(
            parse("Foo bar { }"),
            Err(MetadataError::MissingOpenBrace {
                offset: 4,
                name: "Foo".into()
            })
        );
        assert_eq!(
            parse("$a=1"),
            Err(MetadataError::AttributeOutsideElement { offset: 0 })
        );
        assert_eq!(parse("{ }"), Err(MetadataError::EmptyName { offset: 0 }));
        assert_eq!(parse("Foo { $=1 }"), Err(MetadataError::EmptyName { offset: 7 }));
        assert_eq!(parse("Foo"), Err(MetadataError::Truncated { offset: 3 }));
        assert_eq!(parse("Foo { $"), Err(MetadataError::Truncated { offset: 7 }));
        assert_eq!(
            parse("Foo { } Bar { }"),
            Err(MetadataError::MultipleRoots { offset: 8 })
        );
    }

    #[test]
    fn test_unmatched_close_after_root() {
        assert_eq!(
            parse("Foo { } }"),
            Err(MetadataError::UnmatchedClose { offset: 8 })
        );
    }

    #[test]
    fn test_header_wraps_several_roots() {
        let root = parse_header("component { $className=a.B } instance { $component=a.B }")
            .unwrap();
        assert_eq!(root.name(), HEADER_ROOT);
        assert_eq!(root.elements().len(), 2);
        assert_eq!(root.elements()[1].attribute("component"), Some("a.B"));

        assert!(parse_header("").unwrap().elements().is_empty());
    }

    #[test]
    fn test_print_then_parse_is_identity() {
        let text = "ns:component { $className=org.example.Foo $h:x=1 \
                    h:handler { $y=2 property { } } provides { } }";
        let tree = parse(text).unwrap();
        let printed = tree.to_manifest_string();
        assert_eq!(printed, text);
        assert_eq!(parse(&printed).unwrap(), tree);
    }

    #[test]
    fn test_deeply_nested_input() {
        let depth = 50_000;
        let text = format!("{}{}", "n { ".repeat(depth), "} ".repeat(depth));
        let root = parse(&text).unwrap();
        assert_eq!(root.depth(), depth);
        let reparsed = parse(&root.to_manifest_string()).unwrap();
        assert_eq!(reparsed, root);
    }
}
