//! Filter UI binding.
//!
//! Turns the schema's query vocabulary into what a filter panel renders:
//! one control per filterable attribute with its legal values, and the list
//! of sortable attributes. Values are resolved by
//! [`QueryService::legal_values`], so the options shown can never disagree
//! with what the query endpoint accepts.

use serde::Serialize;

use crate::error::QueryError;
use crate::query::QueryService;

/// Human-readable form of a raw value: each whitespace-separated word gets
/// an upper-case first character and a lower-case remainder.
///
/// `"ai decision-making"` → `"Ai Decision-making"`.
pub fn display_label(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterControl {
    pub attribute: String,
    pub label: String,
    pub options: Vec<FilterOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortControl {
    pub attribute: String,
    pub label: String,
    pub directions: [&'static str; 2],
}

/// Everything a client needs to build its filter and sort controls.
#[derive(Debug, Clone, Serialize)]
pub struct Vocabulary {
    pub filters: Vec<FilterControl>,
    pub sorts: Vec<SortControl>,
}

fn to_options(values: Vec<String>) -> Vec<FilterOption> {
    values
        .into_iter()
        .map(|value| FilterOption {
            label: display_label(&value),
            value,
        })
        .collect()
}

/// Ordered legal values of one attribute, with display labels.
pub async fn filter_options(
    service: &QueryService,
    attribute: &str,
) -> Result<Vec<FilterOption>, QueryError> {
    Ok(to_options(service.legal_values(attribute).await?))
}

pub async fn vocabulary(service: &QueryService) -> Result<Vocabulary, QueryError> {
    let filters = service
        .all_legal_values()
        .await?
        .into_iter()
        .map(|(spec, values)| FilterControl {
            attribute: spec.name.clone(),
            label: spec.display_label(),
            options: to_options(values),
        })
        .collect();

    let sorts = service
        .schema()
        .sortable()
        .map(|spec| SortControl {
            attribute: spec.name.clone(),
            label: spec.display_label(),
            directions: ["asc", "desc"],
        })
        .collect();

    Ok(Vocabulary { filters, sorts })
}

/// CLI entry point for `blip filters [ATTRIBUTE]`.
pub async fn run_filters_cmd(
    service: &QueryService,
    attribute: Option<&str>,
) -> anyhow::Result<()> {
    match attribute {
        Some(attribute) => {
            let options = filter_options(service, attribute).await?;
            if options.is_empty() {
                println!("No values for '{}'.", attribute);
            }
            for option in options {
                println!("{:<32} {}", option.value, option.label);
            }
        }
        None => {
            let vocab = vocabulary(service).await?;
            println!("Filters:");
            for control in &vocab.filters {
                println!(
                    "  {} ({}): {} values",
                    control.attribute,
                    control.label,
                    control.options.len()
                );
            }
            println!("Sorts:");
            for control in &vocab.sorts {
                println!("  {} ({})", control.attribute, control.label);
            }
        }
    }
    Ok(())
}
