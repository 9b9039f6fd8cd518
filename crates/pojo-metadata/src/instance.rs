//! Component types and instance configurations
//!
//! Under a header root, every child is either a component type description
//! or an `instance` element:
//!
//! ```text
//! instance { $component=org.example.Foo $name=foo-1
//!     property { $name=port $value=8080 }
//!     property { $name=hosts $type=list property { $value=a } property { $value=b } } }
//! ```

use crate::element::Element;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Nesting limit for property structures
pub const MAX_PROPERTY_DEPTH: usize = 64;

/// Errors decoding an `instance` element
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    /// `instance` without a `component` attribute
    #[error("An instance does not have the 'component' attribute")]
    MissingComponent,

    /// Keyed property without a `name`
    #[error("A property of instance {instance:?} does not have the 'name' attribute")]
    MissingPropertyName {
        /// `name` of the enclosing instance, when it has one
        instance: Option<String>,
    },

    /// Named property inside a list or array
    #[error("Anonymous property expected in a list or an array, found '{name}'")]
    UnexpectedPropertyName {
        /// The name found on the list or array item
        name: String,
    },

    /// `type` attribute with an unsupported value
    #[error("Unknown property type '{0}'")]
    UnknownType(String),

    /// Property structures nested deeper than [`MAX_PROPERTY_DEPTH`]
    #[error("Property nesting exceeds {MAX_PROPERTY_DEPTH} levels")]
    TooDeep,
}

/// A decoded property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    /// A `value` attribute
    Text(String),
    /// `type=dictionary` (or no type): named sub-properties
    Dictionary(BTreeMap<String, PropertyValue>),
    /// `type=map`: named sub-properties
    Map(BTreeMap<String, PropertyValue>),
    /// `type=list`: anonymous sub-properties
    List(Vec<PropertyValue>),
    /// `type=array`: anonymous sub-properties
    Array(Vec<PropertyValue>),
}

/// One `instance` element, decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceConfiguration {
    /// Component type name (`component` attribute)
    pub component: String,
    /// Instance name (`name` attribute)
    pub name: Option<String>,
    /// Top-level properties by name
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Component type descriptions: the root's children that are not instances
pub fn components(root: &Element) -> Vec<&Element> {
    root.elements()
        .iter()
        .filter(|e| e.name() != "instance")
        .collect()
}

/// Decode every `instance` child of the root
pub fn instances(root: &Element) -> Result<Vec<InstanceConfiguration>, InstanceError> {
    root.elements_named("instance").map(decode_instance).collect()
}

fn decode_instance(instance: &Element) -> Result<InstanceConfiguration, InstanceError> {
    let component = instance
        .attribute("component")
        .ok_or(InstanceError::MissingComponent)?
        .to_owned();
    let name = instance.attribute("name").map(str::to_owned);

    let mut properties = BTreeMap::new();
    for property in instance.elements_named("property") {
        let key = property
            .attribute("name")
            .ok_or_else(|| InstanceError::MissingPropertyName {
                instance: name.clone(),
            })?;
        properties.insert(key.to_owned(), decode_value(property, name.as_deref(), 0)?);
    }

    Ok(InstanceConfiguration {
        component,
        name,
        properties,
    })
}

fn decode_value(
    property: &Element,
    instance: Option<&str>,
    depth: usize,
) -> Result<PropertyValue, InstanceError> {
    if depth >= MAX_PROPERTY_DEPTH {
        return Err(InstanceError::TooDeep);
    }
    if let Some(value) = property.attribute("value") {
        return Ok(PropertyValue::Text(value.to_owned()));
    }

    let kind = property
        .attribute("type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "dictionary".to_owned());

    match kind.as_str() {
        "dictionary" | "map" => {
            let mut entries = BTreeMap::new();
            for child in property.elements_named("property") {
                let key = child
                    .attribute("name")
                    .ok_or_else(|| InstanceError::MissingPropertyName {
                        instance: instance.map(str::to_owned),
                    })?;
                entries.insert(key.to_owned(), decode_value(child, instance, depth + 1)?);
            }
            Ok(if kind == "map" {
                PropertyValue::Map(entries)
            } else {
                PropertyValue::Dictionary(entries)
            })
        }
        "list" | "array" => {
            let mut items = Vec::new();
            for child in property.elements_named("property") {
                if let Some(name) = child.attribute("name") {
                    return Err(InstanceError::UnexpectedPropertyName {
                        name: name.to_owned(),
                    });
                }
                items.push(decode_value(child, instance, depth + 1)?);
            }
            Ok(if kind == "array" {
                PropertyValue::Array(items)
            } else {
                PropertyValue::List(items)
            })
        }
        _ => Err(InstanceError::UnknownType(kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_header;

    #[test]
    fn test_components_exclude_instances() {
        let root = parse_header(
            "component { $className=a.B } handler:ext { } instance { $component=a.B }",
        )
        .unwrap();
        let names: Vec<_> = components(&root).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["component", "ext"]);
    }

    #[test]
    fn test_simple_instance() {
        let root = parse_header(
            "instance { $component=a.B $name=b-1 property { $name=port $value=8080 } }",
        )
        .unwrap();
        let configs = instances(&root).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].component, "a.B");
        assert_eq!(configs[0].name.as_deref(), Some("b-1"));
        assert_eq!(
            configs[0].properties.get("port"),
            Some(&PropertyValue::Text("8080".into()))
        );
    }

    #[test]
    fn test_structured_properties() {
        let root = parse_header(
            "instance { $component=a.B \
               property { $name=hosts $type=LIST property { $value=a } property { $value=b } } \
               property { $name=conf property { $name=k $value=v } } \
               property { $name=m $type=map } \
               property { $name=arr $type=array property { $type=list } } }",
        )
        .unwrap();
        let config = &instances(&root).unwrap()[0];
        assert_eq!(
            config.properties["hosts"],
            PropertyValue::List(vec![
                PropertyValue::Text("a".into()),
                PropertyValue::Text("b".into())
            ])
        );
        let mut conf = BTreeMap::new();
        conf.insert("k".to_string(), PropertyValue::Text("v".into()));
        assert_eq!(config.properties["conf"], PropertyValue::Dictionary(conf));
        assert_eq!(config.properties["m"], PropertyValue::Map(BTreeMap::new()));
        assert_eq!(
            config.properties["arr"],
            PropertyValue::Array(vec![PropertyValue::List(Vec::new())])
        );
    }

    #[test]
    fn test_instance_errors() {
        let missing = parse_header("instance { $name=x }").unwrap();
        assert_eq!(instances(&missing), Err(InstanceError::MissingComponent));

        let unnamed = parse_header("instance { $component=a $name=x property { $value=1 } }")
            .unwrap();
        assert_eq!(
            instances(&unnamed),
            Err(InstanceError::MissingPropertyName {
                instance: Some("x".into())
            })
        );

        let named_in_list = parse_header(
            "instance { $component=a property { $name=l $type=list property { $name=n $value=1 } } }",
        )
        .unwrap();
        assert_eq!(
            instances(&named_in_list),
            Err(InstanceError::UnexpectedPropertyName { name: "n".into() })
        );

        let unknown = parse_header("instance { $component=a property { $name=p $type=set } }")
            .unwrap();
        assert_eq!(
            instances(&unknown),
            Err(InstanceError::UnknownType("set".into()))
        );
    }

    #[test]
    fn test_nesting_limit() {
        let depth = MAX_PROPERTY_DEPTH + 1;
        let text = format!(
            "instance {{ $component=a {}{} }}",
            "property { $name=p ".repeat(depth),
            "} ".repeat(depth)
        );
        let root = parse_header(&text).unwrap();
        assert_eq!(instances(&root), Err(InstanceError::TooDeep));
    }
}
