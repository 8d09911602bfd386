mod test_helpers;

use serde_json::json;
use taproom::TaproomError;
use taproom::install::InstallFlags;
use taproom::keg::{Keg, LinkMode};
use taproom::options::Options;
use taproom::tab::{InstallKind, Tab};
use test_helpers::TestEnvironment;

fn plan_names(env: &TestEnvironment, name: &str, options: &[&str], flags: &InstallFlags) -> Vec<String> {
    let installer = env.installer();
    let formula = installer.formulary().load(name).unwrap();
    installer
        .plan(formula, &Options::from_flags(options.iter().copied()), flags)
        .unwrap()
        .names()
}

fn plan_error(env: &TestEnvironment, name: &str) -> TaproomError {
    let installer = env.installer();
    let formula = installer.formulary().load(name).unwrap();
    installer
        .plan(formula, &Options::new(), &InstallFlags::default())
        .unwrap_err()
}

#[test]
fn test_diamond_collapses_to_one_entry() {
    let env = TestEnvironment::new();
    env.write_formula(json!({"name": "a", "version": "1.0", "dependencies": [{"name": "b"}, {"name": "c"}]}));
    env.write_formula(json!({"name": "b", "version": "1.0", "dependencies": [{"name": "d"}]}));
    env.write_formula(json!({"name": "c", "version": "1.0", "dependencies": [{"name": "d"}]}));
    env.write_formula(json!({"name": "d", "version": "1.0"}));

    let names = plan_names(&env, "a", &[], &InstallFlags::default());
    assert_eq!(names, vec!["d", "b", "c", "a"]);
}

#[test]
fn test_dependencies_come_before_dependents() {
    let env = TestEnvironment::new();
    env.write_formula(json!({"name": "app", "version": "1.0", "dependencies": [{"name": "lib"}, {"name": "tool"}]}));
    env.write_formula(json!({"name": "lib", "version": "1.0", "dependencies": [{"name": "zlib"}]}));
    env.write_formula(json!({"name": "tool", "version": "1.0", "dependencies": [{"name": "lib"}, {"name": "zlib"}]}));
    env.write_formula(json!({"name": "zlib", "version": "1.0"}));

    let names = plan_names(&env, "app", &[], &InstallFlags::default());
    let position = |n: &str| names.iter().position(|x| x == n).unwrap();

    assert!(position("zlib") < position("lib"));
    assert!(position("lib") < position("tool"));
    assert!(position("zlib") < position("tool"));
    assert_eq!(names.last().map(String::as_str), Some("app"));
}

#[test]
fn test_optional_dependency_follows_with_option() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "dependencies": [{"name": "b"}, {"name": "c", "tags": ["optional"]}]
    }));
    env.write_formula(json!({"name": "b", "version": "1.0"}));
    env.write_formula(json!({"name": "c", "version": "1.0"}));

    assert_eq!(plan_names(&env, "a", &[], &InstallFlags::default()), vec!["b", "a"]);
    assert_eq!(
        plan_names(&env, "a", &["with-c"], &InstallFlags::default()),
        vec!["b", "c", "a"]
    );
}

#[test]
fn test_disabled_recommended_dependency_is_dropped() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "dependencies": [{"name": "r", "tags": ["recommended"]}]
    }));
    env.write_formula(json!({"name": "r", "version": "1.0"}));

    assert_eq!(plan_names(&env, "a", &[], &InstallFlags::default()), vec!["r", "a"]);
    assert_eq!(
        plan_names(&env, "a", &["without-r"], &InstallFlags::default()),
        vec!["a"]
    );
}

#[test]
fn test_build_dependencies_pruned_when_pouring() {
    let env = TestEnvironment::new();
    let bottle = json!({"files": {"all": {"cellar": ":any", "url": "file:///nonexistent.tar.gz", "sha256": "00"}}});
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "bottle": bottle,
        "dependencies": [{"name": "cmake", "tags": ["build"]}, {"name": "b"}]
    }));
    env.write_formula(json!({
        "name": "b",
        "version": "1.0",
        "bottle": bottle,
        "dependencies": [{"name": "autoconf", "tags": ["build"]}]
    }));
    env.write_formula(json!({"name": "cmake", "version": "3.0"}));
    env.write_formula(json!({"name": "autoconf", "version": "2.72"}));

    assert_eq!(plan_names(&env, "a", &[], &InstallFlags::default()), vec!["b", "a"]);

    let from_source = InstallFlags {
        build_from_source: true,
        ..Default::default()
    };
    assert_eq!(
        plan_names(&env, "a", &[], &from_source),
        vec!["cmake", "autoconf", "b", "a"]
    );
}

#[test]
fn test_fatal_requirements_reported_together() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "dependencies": [{"name": "b"}],
        "requirements": [{"kind": "executable", "name": "frobnicate"}]
    }));
    env.write_formula(json!({
        "name": "b",
        "version": "1.0",
        "requirements": [{"kind": "arch", "arch": "sparc"}]
    }));

    match plan_error(&env, "a") {
        TaproomError::UnsatisfiedRequirements { formula, unmet } => {
            assert_eq!(formula, "a");
            assert_eq!(unmet.len(), 2);
            assert!(unmet.iter().any(|u| u.dependent == "a"));
            assert!(unmet.iter().any(|u| u.dependent == "b"));
        }
        other => panic!("expected unsatisfied requirements, got {}", other),
    }
}

#[test]
fn test_non_fatal_requirement_is_a_warning() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "requirements": [{"kind": "executable", "name": "frobnicate", "fatal": false}]
    }));

    let installer = env.installer();
    let formula = installer.formulary().load("a").unwrap();
    let plan = installer
        .plan(formula, &Options::new(), &InstallFlags::default())
        .unwrap();
    assert_eq!(plan.names(), vec!["a"]);
    assert_eq!(plan.warnings.len(), 1);
    assert_eq!(plan.warnings[0].dependent, "a");
}

#[test]
fn test_unmet_requirement_replaced_by_default_formula() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "requirements": [{"kind": "executable", "name": "git", "default_formula": "git"}]
    }));
    env.write_formula(json!({"name": "git", "version": "2.45"}));

    assert_eq!(plan_names(&env, "a", &[], &InstallFlags::default()), vec!["git", "a"]);
}

#[test]
fn test_unavailable_dependency_names_its_dependent() {
    let env = TestEnvironment::new();
    env.write_formula(json!({"name": "a", "version": "1.0", "dependencies": [{"name": "missing"}]}));

    match plan_error(&env, "a") {
        TaproomError::FormulaUnavailable { name, dependent, .. } => {
            assert_eq!(name, "missing");
            assert_eq!(dependent.as_deref(), Some("a"));
        }
        other => panic!("expected unavailable formula, got {}", other),
    }
}

#[test]
fn test_cycles_are_rejected() {
    let env = TestEnvironment::new();
    env.write_formula(json!({"name": "a", "version": "1.0", "dependencies": [{"name": "b"}]}));
    env.write_formula(json!({"name": "b", "version": "1.0", "dependencies": [{"name": "a"}]}));

    match plan_error(&env, "a") {
        TaproomError::CircularDependency { chain } => {
            assert_eq!(chain, vec!["a", "b", "a"]);
        }
        other => panic!("expected a cycle, got {}", other),
    }
}

#[test]
fn test_first_occurrence_options_win() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "dependencies": [{"name": "b", "options": ["with-x"]}, {"name": "c"}]
    }));
    env.write_formula(json!({"name": "c", "version": "1.0", "dependencies": [{"name": "b"}]}));
    env.write_formula(json!({
        "name": "b",
        "version": "1.0",
        "options": [{"name": "with-x", "description": "Enable x"}]
    }));

    let installer = env.installer();
    let formula = installer.formulary().load("a").unwrap();
    let plan = installer
        .plan(formula, &Options::new(), &InstallFlags::default())
        .unwrap();

    let b = plan.entries.iter().find(|e| e.formula.name == "b").unwrap();
    assert!(b.options.contains("with-x"));
    assert_eq!(plan.names(), vec!["b", "c", "a"]);
}

#[test]
fn test_installed_dependency_is_left_out() {
    let env = TestEnvironment::new();
    env.write_formula(json!({"name": "a", "version": "1.0", "dependencies": [{"name": "b"}]}));
    env.write_formula(json!({"name": "b", "version": "2.0", "dependencies": [{"name": "c"}]}));
    env.write_formula(json!({"name": "c", "version": "1.0"}));

    let formulary = env.formulary();
    let b = formulary.load("b").unwrap();
    let keg = env.keg("b", "2.0", &[("bin/b", "#!/bin/sh\n")]);
    Tab::create(&b, Options::new(), Options::new(), vec![], InstallKind::default())
        .write(&keg)
        .unwrap();
    Keg::new(&keg).link(&env.config, LinkMode::default()).unwrap();

    // c is not installed, so it is still planned even though b is satisfied.
    assert_eq!(plan_names(&env, "a", &[], &InstallFlags::default()), vec!["c", "a"]);
}

#[test]
fn test_installed_dependency_missing_options_is_planned() {
    let env = TestEnvironment::new();
    env.write_formula(json!({
        "name": "a",
        "version": "1.0",
        "dependencies": [{"name": "b", "options": ["with-x"]}]
    }));
    env.write_formula(json!({
        "name": "b",
        "version": "1.0",
        "options": [{"name": "with-x", "description": "Enable x"}]
    }));

    let keg = env.keg("b", "1.0", &[("bin/b", "#!/bin/sh\n")]);
    Keg::new(&keg).link(&env.config, LinkMode::default()).unwrap();

    assert_eq!(plan_names(&env, "a", &[], &InstallFlags::default()), vec!["b", "a"]);
}
