//! Plain-text rendering of compiled models.

use colored::Colorize;
use lcagraph_model::{format_number, ActivityKind, CompiledModel, Param, ParamRegistry, ProcessRow};

fn kind_tag(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::Regular => "",
        ActivityKind::LeafReference => " (copy)",
        ActivityKind::Switch => " (switch)",
        ActivityKind::MultiSwitch => " (scenario switch)",
        ActivityKind::Interpolation => " (interpolation)",
    }
}

/// One block per reachable activity with its symbolic exchanges.
pub fn render_graph(model: &CompiledModel) -> String {
    let mut out = String::new();
    if let Some(project) = &model.project {
        out.push_str(&format!("{} {}\n", "project".bold(), project));
    }
    out.push_str(&format!("{} {}\n", "background".bold(), model.background));
    for method in &model.methods {
        out.push_str(&format!("{} {}\n", "method".bold(), method));
    }

    for activity in model.reachable() {
        out.push_str(&format!(
            "\n{}{}\n",
            activity.name.green().bold(),
            kind_tag(activity.kind).dimmed()
        ));
        for exchange in &activity.exchanges {
            out.push_str(&format!(
                "  {} {} = {}\n",
                "→".yellow(),
                model.namespace.input_name(&exchange.input),
                exchange.amount
            ));
        }
    }
    out
}

pub fn render_evaluated(edges: &[(String, String, f64)]) -> String {
    let width = edges.iter().map(|(c, _, _)| c.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (consumer, input, amount) in edges {
        out.push_str(&format!(
            "{consumer:<width$}  {} {input}  {}\n",
            "→".yellow(),
            format_number(*amount, 3)
        ));
    }
    out
}

pub fn render_processes(rows: &[ProcessRow]) -> String {
    let width = rows
        .iter()
        .map(|r| 2 * r.level + r.activity.len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for row in rows {
        let label = format!("{}{}", "  ".repeat(row.level), row.activity);
        out.push_str(&format!(
            "{label:<width$}  {:>10}  {:<12}  {}\n",
            row.exchange,
            row.unit.as_deref().unwrap_or("-"),
            row.database.dimmed()
        ));
    }
    out
}

pub fn render_params(registry: &ParamRegistry) -> String {
    let mut out = String::new();
    for param in registry.iter() {
        let line = match param {
            Param::Float(p) if p.is_fixed() => format!("{} float = {}", p.name.bold(), p.default),
            Param::Float(p) => format!(
                "{} float = {} [{}, {}]",
                p.name.bold(),
                p.default,
                p.min,
                p.max
            ),
            Param::Enum(p) => format!(
                "{} enum = {} {{{}}}",
                p.name.bold(),
                p.default,
                p.values.join(", ")
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_render_ranges_and_labels() {
        colored::control::set_override(false);
        let mut registry = ParamRegistry::new();
        registry.get_or_create_float("mass", 2.0, 1.0, 3.0).unwrap();
        registry.get_or_create_float("share", 1.0, 1.0, 1.0).unwrap();
        registry
            .get_or_create_enum("frame_switch_param", &["steel", "carbon"], "steel")
            .unwrap();
        assert_eq!(
            render_params(&registry),
            "mass float = 2 [1, 3]\nshare float = 1\nframe_switch_param enum = steel {steel, carbon}\n"
        );
    }

    #[test]
    fn processes_indent_by_level() {
        colored::control::set_override(false);
        let rows = vec![
            ProcessRow {
                activity: "model".to_string(),
                level: 0,
                parent: String::new(),
                exchange: "1.00e+00".to_string(),
                unit: None,
                location: "GLO".to_string(),
                database: "Foreground DB".to_string(),
            },
            ProcessRow {
                activity: "tube".to_string(),
                level: 1,
                parent: "model".to_string(),
                exchange: "2.00e+00".to_string(),
                unit: Some("kilogram".to_string()),
                location: "GLO".to_string(),
                database: "ei".to_string(),
            },
        ];
        let text = render_processes(&rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("model "));
        assert!(lines[1].starts_with("  tube"));
        assert!(lines[1].ends_with("2.00e+00  kilogram      ei"));
    }

    #[test]
    fn evaluated_edges_align_on_consumer() {
        colored::control::set_override(false);
        let edges = vec![
            ("model".to_string(), "frame".to_string(), 1.0),
            ("frame".to_string(), "tube".to_string(), 0.5),
        ];
        assert_eq!(
            render_evaluated(&edges),
            "model  → frame  1.000\nframe  → tube  5.000e-01\n"
        );
    }
}
