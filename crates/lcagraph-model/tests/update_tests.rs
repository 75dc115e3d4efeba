//! Exchange update E2E tests

mod common;

use common::{activity, config, config_with, exchange, reference_db, SCENARIOS};
use lcagraph_model::*;

fn compile(model: &str) -> CompiledModel {
    compile_model(&config(model), &reference_db(), &CompilerOptions::default())
        .expect("model compiles")
}

fn find<'a>(model: &'a CompiledModel, name: &str) -> &'a Activity {
    let id = model
        .namespace
        .find(name)
        .unwrap_or_else(|| panic!("no activity {name}"));
    model.namespace.activity(id).unwrap()
}

/// `(input name, amount)` for every exchange of `name`.
fn inputs(model: &CompiledModel, name: &str) -> Vec<(String, String)> {
    find(model, name)
        .exchanges
        .iter()
        .map(|ex| {
            (
                model.namespace.input_name(&ex.input).to_string(),
                ex.amount.to_string(),
            )
        })
        .collect()
}

fn skipped(model: &CompiledModel) -> Vec<&UpdateError> {
    model
        .diagnostics
        .iter()
        .filter_map(|d| match d {
            Diagnostic::SkippedUpdate { error, .. } => Some(error),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Replacing inputs
// ============================================================================

#[test]
fn test_replace_input_keeping_amount() {
    let model = compile(
        r#"  steel:
    name: market for steel
    update:
      - input_activity: electricity, medium voltage
        new_value: { name: "electricity, from wind", exchange: keep }
"#,
    );
    assert_eq!(
        inputs(&model, "steel"),
        vec![
            ("iron ore".to_string(), "1.2".to_string()),
            ("Carbon dioxide, fossil".to_string(), "2".to_string()),
            ("electricity, from wind".to_string(), "0.5".to_string()),
        ]
    );
    assert!(model.diagnostics.is_empty());
}

#[test]
fn test_replacement_with_new_amount_registers_parameters() {
    let model = compile(
        r#"  steel:
    name: market for steel
    update:
      - input_activity: iron ore
        new_value: { name: aluminium, exchange: share * 3 }
"#,
    );
    let steel = inputs(&model, "steel");
    assert!(steel.contains(&("aluminium".to_string(), "share*3".to_string())));
    assert!(!steel.iter().any(|(name, _)| name == "iron ore"));
    assert!(model.parameters.float("share").is_some());
}

#[test]
fn test_directives_apply_in_order_and_keep_reads_the_latest_amount() {
    let model = compile(
        r#"  steel:
    name: market for steel
    update:
      - input_activity: electricity, medium voltage
        new_value: { name: "electricity, from wind", exchange: 2 * x }
      - input_activity: electricity, from wind
        new_value: { name: "electricity, from solar", exchange: keep }
"#,
    );
    let steel = inputs(&model, "steel");
    assert!(steel.contains(&("electricity, from solar".to_string(), "2*x".to_string())));
    assert!(!steel.iter().any(|(name, _)| name.starts_with("electricity, from wind")));
    assert!(!steel.iter().any(|(name, _)| name == "electricity, medium voltage"));
}

#[test]
fn test_group_replacement_is_built_in_place() {
    let model = compile(
        r#"  steel:
    name: market for steel
    update:
      - input_activity: electricity, medium voltage
        new_value:
          mix:
            exchange: keep
            is_switch: true
            wind: { name: "electricity, from wind" }
            solar: { name: "electricity, from solar" }
"#,
    );
    assert!(inputs(&model, "steel").contains(&("mix".to_string(), "0.5".to_string())));
    assert_eq!(find(&model, "mix").kind, ActivityKind::Switch);
    assert!(model.parameters.enum_param("mix_switch_param").is_some());
    assert!(model.is_acyclic());
    let names: Vec<_> = model.reachable().iter().map(|a| a.name.clone()).collect();
    assert_eq!(names, vec!["model", "steel", "mix", "wind", "solar"]);
}

// ============================================================================
// Skipped and no-op directives
// ============================================================================

#[test]
fn test_bare_keep_changes_nothing() {
    let model = compile(
        "  steel:
    name: market for steel
    update:
      - input_activity: iron ore
        new_value: keep
",
    );
    assert_eq!(find(&model, "steel").exchanges.len(), 3);
    assert_eq!(
        model.diagnostics,
        vec![Diagnostic::KeptExchange {
            activity: "steel".to_string(),
            input: "iron ore".to_string(),
        }]
    );
}

#[test]
fn test_unknown_input_is_skipped() {
    let model = compile(
        "  steel:
    name: market for steel
    update:
      - input_activity: natural gas
        new_value: { name: aluminium }
",
    );
    assert_eq!(find(&model, "steel").exchanges.len(), 3);
    assert!(matches!(
        skipped(&model).as_slice(),
        [UpdateError::InputNotFound { input, .. }] if input == "natural gas"
    ));
}

#[test]
fn test_several_replacement_entries_are_skipped() {
    let model = compile(
        "  steel:
    name: market for steel
    update:
      - input_activity: iron ore
        new_value:
          one: { x: { name: aluminium } }
          two: { y: { name: aluminium } }
",
    );
    assert!(matches!(
        skipped(&model).as_slice(),
        [UpdateError::AmbiguousUpdateDirective { count: 2, .. }]
    ));
    assert!(!model.namespace.contains("one"));
}

#[test]
fn test_updates_on_groups_are_reported() {
    let model = compile(
        "  frame:
    update:
      - { input_activity: iron ore, new_value: keep }
    tube: { name: iron ore }
",
    );
    assert!(matches!(
        skipped(&model).as_slice(),
        [UpdateError::NotUpdatable { activity }] if activity == "frame"
    ));
}

#[test]
fn test_missing_replacement_activity_is_fatal() {
    let err = compile_model(
        &config(
            "  steel:
    name: market for steel
    update:
      - input_activity: iron ore
        new_value: { name: unobtainium }
",
        ),
        &reference_db(),
        &CompilerOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::ActivityNotFound { .. }), "err={err}");
}

// ============================================================================
// Scenario mode
// ============================================================================

const WIND_UPDATE: &str = r#"  steel:
    name: market for steel
    update:
      - input_activity: electricity, medium voltage
        new_value: { name: "electricity, from wind", exchange: keep }
"#;

const COPIES: [(&str, &str, &str); 3] = [
    ("steel_remind_SSP2Base_2020", "ei_remind_SSP2-Base_2020", "0.4"),
    ("steel_remind_SSP2Base_2030", "ei_remind_SSP2-Base_2030", "0.30000000000000004"),
    ("steel_image_SSP2Base_2020", "ei_image_SSP2-Base_2020", "0.2"),
];

#[test]
fn test_scenario_updates_reach_every_copy_in_its_own_database() {
    let model = compile_model(
        &config_with(WIND_UPDATE, SCENARIOS),
        &reference_db(),
        &CompilerOptions::default(),
    )
    .unwrap();

    for (name, database, amount) in COPIES {
        let copy = find(&model, name);
        let wind = copy
            .exchanges
            .iter()
            .find_map(|ex| match &ex.input {
                ExchangeInput::Reference { key } if key.name == "electricity, from wind" => {
                    Some((key, ex.amount.to_string()))
                }
                _ => None,
            })
            .unwrap_or_else(|| panic!("{name} has no wind input"));
        assert_eq!(wind.0.database, database);
        assert_eq!(wind.1, amount);
        assert!(!inputs(&model, name)
            .iter()
            .any(|(input, _)| input == "electricity, medium voltage"));
    }
    assert!(model.diagnostics.is_empty());
}

#[test]
fn test_scenario_group_replacement_is_shared() {
    let model = compile_model(
        &config_with(
            r#"  steel:
    name: market for steel
    update:
      - input_activity: electricity, medium voltage
        new_value:
          mix:
            exchange: keep
            wind: { name: "electricity, from wind" }
"#,
            SCENARIOS,
        ),
        &reference_db(),
        &CompilerOptions::default(),
    )
    .unwrap();

    let mix = model.namespace.find("mix").unwrap();
    assert!(!model.namespace.contains("mix_1"));
    for (name, _, _) in COPIES {
        assert!(find(&model, name)
            .exchanges
            .iter()
            .any(|ex| ex.input.as_activity() == Some(mix)));
    }
}

#[test]
fn test_scenario_update_is_all_or_nothing() {
    // the image database has no electricity input on steel
    let mut db = ReferenceDb::new();
    for name in ["ei", "ei_remind_SSP2-Base_2020", "ei_remind_SSP2-Base_2030"] {
        db.add_technosphere(
            name,
            activity(
                "market for steel",
                "GLO",
                vec![exchange("electricity, medium voltage", None, 0.5)],
            ),
        );
        db.add_technosphere(name, activity("electricity, from wind", "GLO", Vec::new()));
    }
    db.add_technosphere(
        "ei_image_SSP2-Base_2020",
        activity("market for steel", "GLO", vec![exchange("iron ore", None, 1.0)]),
    );

    let model = compile_model(
        &config_with(WIND_UPDATE, SCENARIOS),
        &db,
        &CompilerOptions::default(),
    )
    .unwrap();

    assert!(matches!(
        skipped(&model).as_slice(),
        [UpdateError::InputNotFound { activity, .. }] if activity == "steel_image_SSP2Base_2020"
    ));
    for name in ["steel_remind_SSP2Base_2020", "steel_remind_SSP2Base_2030"] {
        assert_eq!(
            inputs(&model, name),
            vec![("electricity, medium voltage".to_string(), "0.5".to_string())]
        );
    }
}
