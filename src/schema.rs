//! Record schema: which attributes a record carries, how they are typed,
//! and which of them callers may filter or sort on.
//!
//! The schema is the single source of the query vocabulary. Filter specs
//! and sort specs are derived from it, never stored on their own.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::DEFAULT_TOPICS;

/// Attribute names that cannot be declared: the two every record carries,
/// and the query-string controls of `GET /records`.
pub const RESERVED_NAMES: [&str; 6] = ["id", "last_updated", "sort", "order", "limit", "offset"];

/// Aspects of life an article's consequence affects.
pub const ASPECTS: [&str; 10] = [
    "Health & Well-being",
    "Security & Privacy",
    "Equality & Justice",
    "User Experience",
    "Economy",
    "Access to Information & Discourse",
    "Environment & Sustainability",
    "Politics",
    "Power Dynamics",
    "Social Norms & Relationship",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    Text,
    Number,
    /// String drawn from an enumerated set of legal values.
    Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    pub kind: AttributeKind,
    /// Upstream key the value is read from. Defaults to `name`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub sortable: bool,
    /// Fixed legal values for a category. Empty means the legal set is
    /// whatever the store currently holds.
    #[serde(default)]
    pub values: Vec<String>,
    /// Display label; derived from `name` when absent.
    #[serde(default)]
    pub label: Option<String>,
}

impl AttributeSpec {
    pub fn source_key(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    pub fn has_fixed_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn display_label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => crate::filters::display_label(&self.name.replace('_', " ")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Upstream key holding the record identifier.
    #[serde(default = "default_id_source")]
    pub id_source: String,
    pub attributes: Vec<AttributeSpec>,
}

fn default_id_source() -> String {
    "id".to_string()
}

impl Schema {
    pub fn new(attributes: Vec<AttributeSpec>) -> Self {
        Self {
            id_source: default_id_source(),
            attributes,
        }
    }

    /// Schema of the technology-consequences article catalogue.
    ///
    /// `summary` and `aspect` are optional and read from the `gpt_summary`
    /// and `sector` keys of pre-enriched feeds. The built-in providers leave
    /// them unset.
    pub fn article_catalogue() -> Self {
        let text = |name: &str, required: bool, sortable: bool| AttributeSpec {
            name: name.to_string(),
            kind: AttributeKind::Text,
            source: None,
            required,
            filterable: false,
            sortable,
            values: Vec::new(),
            label: None,
        };
        Self::new(vec![
            text("title", true, true),
            text("text", false, false),
            AttributeSpec {
                name: "magazine".to_string(),
                kind: AttributeKind::Category,
                source: None,
                required: true,
                filterable: true,
                sortable: true,
                values: Vec::new(),
                label: Some("Source".to_string()),
            },
            text("url", true, false),
            AttributeSpec {
                name: "label".to_string(),
                kind: AttributeKind::Category,
                source: None,
                required: true,
                filterable: true,
                sortable: true,
                values: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
                label: Some("Technology".to_string()),
            },
            AttributeSpec {
                label: Some("Published".to_string()),
                ..text("published_at", false, true)
            },
            AttributeSpec {
                source: Some("gpt_summary".to_string()),
                ..text("summary", false, false)
            },
            AttributeSpec {
                name: "aspect".to_string(),
                kind: AttributeKind::Category,
                source: Some("sector".to_string()),
                required: false,
                filterable: true,
                sortable: true,
                values: ASPECTS.iter().map(|a| a.to_string()).collect(),
                label: None,
            },
        ])
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn filterable(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.filterable)
    }

    pub fn sortable(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.attributes.iter().filter(|a| a.sortable)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_source.trim().is_empty() {
            bail!("schema.id_source must not be empty");
        }
        if self.attributes.is_empty() {
            bail!("schema.attributes must declare at least one attribute");
        }

        let mut seen = HashSet::new();
        for attr in &self.attributes {
            if attr.name.trim().is_empty() {
                bail!("schema: attribute names must not be empty");
            }
            if RESERVED_NAMES.contains(&attr.name.as_str()) {
                bail!("schema: '{}' is reserved and cannot be an attribute", attr.name);
            }
            if !seen.insert(attr.name.as_str()) {
                bail!("schema: duplicate attribute '{}'", attr.name);
            }
            if attr.kind != AttributeKind::Category {
                if attr.filterable {
                    bail!(
                        "schema: '{}' is filterable but only category attributes can be",
                        attr.name
                    );
                }
                if !attr.values.is_empty() {
                    bail!(
                        "schema: '{}' declares values but is not a category",
                        attr.name
                    );
                }
            }
            let mut values = HashSet::new();
            for v in &attr.values {
                if !values.insert(v.as_str()) {
                    bail!("schema: '{}' lists value '{}' twice", attr.name, v);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str) -> AttributeSpec {
        AttributeSpec {
            name: name.to_string(),
            kind: AttributeKind::Category,
            source: None,
            required: false,
            filterable: true,
            sortable: false,
            values: Vec::new(),
            label: None,
        }
    }

    #[test]
    fn article_catalogue_is_valid() {
        let schema = Schema::article_catalogue();
        schema.validate().unwrap();
        let filterable: Vec<&str> = schema.filterable().map(|a| a.name.as_str()).collect();
        assert_eq!(filterable, vec!["magazine", "label", "aspect"]);
        let aspect = schema.attribute("aspect").unwrap();
        assert_eq!(aspect.source_key(), "sector");
        assert_eq!(aspect.values.len(), ASPECTS.len());
        assert!(!aspect.required);
        assert_eq!(schema.attribute("summary").unwrap().source_key(), "gpt_summary");
        assert_eq!(
            schema.attribute("label").unwrap().display_label(),
            "Technology"
        );
        assert_eq!(
            schema.attribute("published_at").unwrap().display_label(),
            "Published"
        );
    }

    #[test]
    fn reserved_and_duplicate_names_are_rejected() {
        for name in RESERVED_NAMES {
            let err = Schema::new(vec![category(name)]).validate().unwrap_err();
            assert!(err.to_string().contains("reserved"), "{}", err);
        }
        assert!(Schema::new(vec![category("a"), category("a")])
            .validate()
            .is_err());
    }

    #[test]
    fn only_categories_are_filterable() {
        let mut attr = category("value");
        attr.kind = AttributeKind::Number;
        let err = Schema::new(vec![attr]).validate().unwrap_err().to_string();
        assert!(err.contains("only category"), "{}", err);
    }

    #[test]
    fn label_falls_back_to_name() {
        let attr = category("news_desk");
        assert_eq!(attr.display_label(), "News Desk");
        assert_eq!(attr.source_key(), "news_desk");
    }
}
