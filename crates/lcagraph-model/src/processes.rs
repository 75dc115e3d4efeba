//! Process listing
//!
//! Flattens a compiled model into depth-first rows, one per visited activity,
//! for display. Traversal stops at the first background level: background
//! inputs are listed (unless `foreground_only`) but not expanded.

use serde::Serialize;

use crate::builder::CompiledModel;
use crate::namespace::{ActivityId, Exchange, ExchangeInput};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRow {
    /// Name, suffixed with ` [loc]` unless the location is global or unknown.
    pub activity: String,
    pub unit: Option<String>,
    pub location: String,
    pub level: usize,
    pub database: String,
    pub parent: String,
    /// Amount of the exchange linking this row to its parent.
    pub exchange: String,
}

/// Format a number with `precision` decimals, switching to scientific
/// notation (`1.23e+04`, `5.00e-01`) unless the exponent is zero.
pub fn format_number(value: f64, precision: usize) -> String {
    let scientific = format!("{value:.precision$e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return scientific;
    };
    if exponent == 0 {
        return format!("{value:.precision$}");
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}

fn display_name(name: &str, location: &str) -> String {
    if location.is_empty() || location == "GLO" {
        name.to_string()
    } else {
        format!("{name} [{location}]")
    }
}

fn exchange_text(exchange: Option<&Exchange>) -> String {
    match exchange.map(|ex| &ex.amount) {
        None => String::new(),
        Some(amount) => match amount.as_num() {
            Some(value) => format_number(value, 2),
            None => amount.to_string(),
        },
    }
}

enum Node<'a> {
    Working(ActivityId),
    Background(&'a ExchangeInput),
}

pub fn process_table(model: &CompiledModel, foreground_only: bool) -> Vec<ProcessRow> {
    let namespace = &model.namespace;
    let foreground = namespace.name().to_string();
    let mut rows = Vec::new();

    // (node, linking exchange, parent display name, level)
    let mut stack: Vec<(Node<'_>, Option<&Exchange>, String, usize)> =
        vec![(Node::Working(model.root), None, String::new(), 0)];

    while let Some((node, exchange, parent, level)) = stack.pop() {
        match node {
            Node::Background(input) => {
                if foreground_only {
                    continue;
                }
                let ExchangeInput::Reference { key } = input else {
                    continue;
                };
                let location = key.location.clone().unwrap_or_default();
                rows.push(ProcessRow {
                    activity: display_name(&key.name, &location),
                    unit: key.unit.clone(),
                    location,
                    level,
                    database: key.database.clone(),
                    parent,
                    exchange: exchange_text(exchange),
                });
            }
            Node::Working(id) => {
                let Some(activity) = namespace.get(id) else {
                    continue;
                };
                let location = activity.location.clone().unwrap_or_default();
                let name = display_name(&activity.name, &location);
                rows.push(ProcessRow {
                    activity: name.clone(),
                    unit: activity.unit.clone(),
                    location,
                    level,
                    database: foreground.clone(),
                    parent,
                    exchange: exchange_text(exchange),
                });
                for ex in activity.exchanges.iter().rev() {
                    let child = match &ex.input {
                        ExchangeInput::Activity { id } => Node::Working(*id),
                        reference => Node::Background(reference),
                    };
                    stack.push((child, Some(ex), name.clone(), level + 1));
                }
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_like_scientific_notation() {
        assert_eq!(format_number(1.0, 2), "1.00");
        assert_eq!(format_number(2.5, 2), "2.50");
        assert_eq!(format_number(12345.0, 2), "1.23e+04");
        assert_eq!(format_number(0.5, 2), "5.00e-01");
        assert_eq!(format_number(-250.0, 2), "-2.50e+02");
        assert_eq!(format_number(0.0, 2), "0.00");
    }

    #[test]
    fn global_locations_are_not_shown() {
        assert_eq!(display_name("steel", "GLO"), "steel");
        assert_eq!(display_name("steel", ""), "steel");
        assert_eq!(display_name("steel", "RER"), "steel [RER]");
    }
}
