use pkd_config::load_layered_yaml_from_strings;

const BASE: &str = r#"
policy:
  confidence_threshold: 0.60
  edge_threshold: 5.0
risk:
  daily_loss_limit: 1000.0
"#;

const OVERRIDE: &str = r#"
policy:
  confidence_threshold: 0.65
run:
  timeout_ms: 300000
"#;

#[test]
fn same_layers_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn later_layer_overrides_earlier() {
    let cfg = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    let v = cfg
        .config_json
        .pointer("/policy/confidence_threshold")
        .unwrap();
    assert_eq!(v.as_f64().unwrap(), 0.65);
    // Untouched keys from the base layer survive the merge.
    let v = cfg.config_json.pointer("/risk/daily_loss_limit").unwrap();
    assert_eq!(v.as_f64().unwrap(), 1000.0);
}

#[test]
fn different_override_changes_hash() {
    let a = load_layered_yaml_from_strings(&[BASE]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE, OVERRIDE]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}
