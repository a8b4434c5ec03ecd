use serde_json::json;
use std::collections::HashMap;
use wa_dispatch::template::{
    default_mapping, free_text_mapping, placeholder_fields, render_free_text, resolve,
    template_slots, Param, Parameters,
};
use wa_dispatch::types::{
    ContactRow, ParamSource, ParameterFormat, ParameterMapping, TemplateComponentDef,
    TemplateDescriptor,
};

fn row(pairs: &[(&str, &str)]) -> ContactRow {
    let values: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ContactRow::new(0, values)
}

fn descriptor(format: ParameterFormat, body: &str, example: Option<serde_json::Value>) -> TemplateDescriptor {
    TemplateDescriptor {
        name: "t".to_string(),
        language: Some("pt_BR".to_string()),
        status: Some("APPROVED".to_string()),
        category: None,
        parameter_format: format,
        components: vec![TemplateComponentDef {
            component_type: "BODY".to_string(),
            format: None,
            text: Some(body.to_string()),
            example,
        }],
    }
}

#[test]
fn test_resolve_named_keyed_by_name() {
    let mut mapping = ParameterMapping::new();
    mapping.insert("nome".to_string(), ParamSource::new("nome", "Cliente"));
    mapping.insert("cidade".to_string(), ParamSource::new("municipio", "Brasília"));
    let params = resolve(ParameterFormat::Named, &mapping, &row(&[("nome", "Ana")]));
    match params {
        Parameters::Named(values) => {
            let keys: Vec<&str> = values.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["cidade", "nome"]);
            assert_eq!(values["nome"], Param::text("Ana"));
            assert_eq!(values["cidade"], Param::text("Brasília"));
        }
        other => panic!("expected named parameters, got {other:?}"),
    }
}

#[test]
fn test_resolve_positional_gap_keeps_only_first() {
    let mut mapping = ParameterMapping::new();
    mapping.insert("1".to_string(), ParamSource::new("nome", "Cliente"));
    mapping.insert("3".to_string(), ParamSource::new("valor", "0"));
    let params = resolve(ParameterFormat::Positional, &mapping, &row(&[("nome", "Ana")]));
    assert_eq!(params, Parameters::Positional(vec![Param::text("Ana")]));
}

#[test]
fn test_resolve_unknown_column_falls_back_to_default() {
    let mut mapping = ParameterMapping::new();
    mapping.insert("1".to_string(), ParamSource::new("inexistente", "Padrão"));
    let params = resolve(ParameterFormat::Positional, &mapping, &row(&[("nome", "Ana")]));
    assert_eq!(params, Parameters::Positional(vec![Param::text("Padrão")]));
}

#[test]
fn test_resolve_source_column_is_normalized() {
    let mut mapping = ParameterMapping::new();
    mapping.insert("1".to_string(), ParamSource::new("  NOME ", ""));
    let params = resolve(ParameterFormat::Positional, &mapping, &row(&[("nome", "Bruno")]));
    assert_eq!(params, Parameters::Positional(vec![Param::text("Bruno")]));
}

#[test]
fn test_template_slots_positional_and_named() {
    assert_eq!(template_slots("Olá {{1}}, {{ 2 }} e {{1}}"), vec!["1", "2"]);
    assert_eq!(template_slots("Olá {{nome}}"), vec!["nome"]);
    assert!(template_slots("sem parâmetros").is_empty());
}

#[test]
fn test_default_mapping_positional_limited_by_declared_slots() {
    let d = descriptor(
        ParameterFormat::Positional,
        "Olá {{1}}!",
        Some(json!({"body_text": [["Maria"]]})),
    );
    let mapping = default_mapping(&d);
    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping["1"], ParamSource::new("nome", "Maria"));
}

#[test]
fn test_default_mapping_positional_without_body_uses_three_columns() {
    let mut d = descriptor(ParameterFormat::Positional, "", None);
    d.components.clear();
    let mapping = default_mapping(&d);
    let columns: Vec<&str> = mapping.values().map(|s| s.source_column.as_str()).collect();
    assert_eq!(columns, vec!["nome", "empresa", "valor"]);
    assert!(mapping.values().all(|s| s.default_value.is_empty()));
}

#[test]
fn test_default_mapping_named_uses_named_examples() {
    let d = descriptor(
        ParameterFormat::Named,
        "Olá {{nome}}, valor {{valor}}",
        Some(json!({
            "body_text_named_params": [
                {"param_name": "nome", "example": "João"},
                {"param_name": "valor", "example": "R$ 1.000"}
            ]
        })),
    );
    let mapping = default_mapping(&d);
    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping["nome"], ParamSource::new("nome", "João"));
    assert_eq!(mapping["valor"], ParamSource::new("valor", "R$ 1.000"));
}

#[test]
fn test_free_text_mapping_defaults() {
    let mapping = free_text_mapping(&placeholder_fields("Olá {nome}"));
    assert_eq!(mapping["nome"], ParamSource::new("nome", "[nome]"));
}

#[test]
fn test_render_free_text_substitutes_every_occurrence() {
    let body = "{nome}, {nome}! Sua empresa {empresa}.";
    let mapping = free_text_mapping(&placeholder_fields(body));
    let text = render_free_text(body, &mapping, &row(&[("nome", "Ana"), ("empresa", "ACME")]));
    assert_eq!(text, "Ana, Ana! Sua empresa ACME.");
}

#[test]
fn test_render_free_text_without_placeholders() {
    let mapping = free_text_mapping(&placeholder_fields("Bom dia"));
    assert!(mapping.is_empty());
    assert_eq!(render_free_text("Bom dia", &mapping, &row(&[])), "Bom dia");
}
