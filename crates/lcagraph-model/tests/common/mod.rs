//! Shared fixtures: a small background with one base database, the biosphere
//! and three scenario databases.

#![allow(dead_code)]

use lcagraph_model::reference::ExternalExchange;
use lcagraph_model::{ExternalActivity, ModelConfig, ReferenceDb};

pub const BASE: &str = "ei";

pub const SCENARIO_DBS: [&str; 3] = [
    "ei_remind_SSP2-Base_2020",
    "ei_remind_SSP2-Base_2030",
    "ei_image_SSP2-Base_2020",
];

pub fn exchange(input: &str, database: Option<&str>, amount: f64) -> ExternalExchange {
    ExternalExchange {
        input: input.to_string(),
        location: None,
        unit: None,
        categories: Vec::new(),
        database: database.map(str::to_string),
        amount,
    }
}

pub fn activity(name: &str, loc: &str, exchanges: Vec<ExternalExchange>) -> ExternalActivity {
    ExternalActivity {
        database: String::new(),
        name: name.to_string(),
        location: Some(loc.to_string()),
        unit: Some("kilogram".to_string()),
        categories: Vec::new(),
        exchanges,
    }
}

fn steel(electricity: f64) -> ExternalActivity {
    activity(
        "market for steel",
        "GLO",
        vec![
            exchange("electricity, medium voltage", None, electricity),
            exchange("iron ore", None, 1.2),
            exchange("Carbon dioxide, fossil", Some("biosphere3"), 2.0),
        ],
    )
}

fn background_database(db: &mut ReferenceDb, name: &str, electricity: f64) {
    db.add_technosphere(name, steel(electricity));
    db.add_technosphere(name, activity("aluminium", "GLO", Vec::new()));
    db.add_technosphere(name, activity("electricity, medium voltage", "GLO", Vec::new()));
    db.add_technosphere(name, activity("electricity, from wind", "GLO", Vec::new()));
    db.add_technosphere(name, activity("electricity, from solar", "GLO", Vec::new()));
    db.add_technosphere(name, activity("iron ore", "GLO", Vec::new()));
}

pub fn reference_db() -> ReferenceDb {
    let mut db = ReferenceDb::new();
    background_database(&mut db, BASE, 0.5);
    for (i, name) in SCENARIO_DBS.iter().enumerate() {
        background_database(&mut db, name, 0.4 - 0.1 * i as f64);
    }
    db.add_biosphere(ExternalActivity {
        database: String::new(),
        name: "Carbon dioxide, fossil".to_string(),
        location: None,
        unit: Some("kilogram".to_string()),
        categories: vec!["air".to_string()],
        exchanges: Vec::new(),
    });
    db
}

/// A document with background `ei` and the given (indented) model body.
pub fn config(model: &str) -> ModelConfig {
    config_with(model, "")
}

pub fn config_with(model: &str, extra: &str) -> ModelConfig {
    let text = format!("project: test\nbackground:\n  database: {BASE}\n{extra}model:\n{model}");
    ModelConfig::from_yaml_str(&text).expect("valid test configuration")
}

pub const SCENARIOS: &str = "scenarios:
  - { model: remind, pathway: SSP2-Base, year: 2020 }
  - { model: remind, pathway: SSP2-Base, year: 2030 }
  - { model: image, pathway: SSP2-Base, year: 2020 }
";
