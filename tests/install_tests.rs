mod test_helpers;

use serde_json::json;
use std::fs;
use taproom::TaproomError;
use taproom::cellar;
use taproom::install::{InstallFlags, InstallOutcome, UpgradeOutcome};
use taproom::lock::FormulaLock;
use taproom::options::Options;
use taproom::tab::Tab;
use test_helpers::{TestEnvironment, bottle_stanza};

fn bottled(env: &TestEnvironment, name: &str, version: &str, deps: &[&str]) {
    let (path, sha) = env.bottle(
        name,
        version,
        &[
            (&format!("bin/{}", name), "#!/bin/sh\necho bottled"),
            (&format!("share/{}/paths.txt", name), "prefix=@@HOMEBREW_PREFIX@@\n"),
        ],
    );
    let deps: Vec<_> = deps.iter().map(|d| json!({"name": d})).collect();
    env.write_formula(json!({
        "name": name,
        "version": version,
        "bottle": bottle_stanza(&path, &sha),
        "dependencies": deps,
    }));
}

fn from_source(env: &TestEnvironment, name: &str, steps: &[&str]) {
    let (path, sha) = env.source(name, "1.0", &[(name, "#!/bin/sh\necho built\n")]);
    env.write_formula(json!({
        "name": name,
        "version": "1.0",
        "url": format!("file://{}", path.display()),
        "sha256": sha,
        "install": steps,
    }));
}

async fn install(env: &TestEnvironment, name: &str) -> taproom::Result<InstallOutcome> {
    env.installer()
        .install(name, &Options::new(), &InstallFlags::default())
        .await
}

#[tokio::test]
async fn test_pour_links_and_writes_receipt() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);

    match install(&env, "hello").await.unwrap() {
        InstallOutcome::Installed { keg, poured, .. } => {
            assert!(poured);
            assert_eq!(keg, env.config.rack("hello").join("1.0"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let keg = env.config.rack("hello").join("1.0");
    assert!(env.prefix_path("bin/hello").symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(cellar::linked_keg(&env.config, "hello"), Some(keg.clone()));
    assert_eq!(cellar::opt_keg(&env.config, "hello"), Some(keg.clone()));

    let tab = Tab::read(&keg).unwrap();
    assert!(tab.poured_from_bottle);
    assert!(tab.installed_on_request);

    let relocated = fs::read_to_string(keg.join("share/hello/paths.txt")).unwrap();
    assert_eq!(relocated, format!("prefix={}\n", env.prefix.display()));
}

#[tokio::test]
async fn test_source_build_runs_in_worker() {
    let env = TestEnvironment::new();
    from_source(
        &env,
        "foo",
        &["mkdir -p \"$PREFIX/bin\"", "cp foo \"$PREFIX/bin/foo\""],
    );

    match install(&env, "foo").await.unwrap() {
        InstallOutcome::Installed { poured, .. } => assert!(!poured),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let keg = env.config.rack("foo").join("1.0");
    assert_eq!(
        fs::read_to_string(keg.join("bin/foo")).unwrap(),
        "#!/bin/sh\necho built\n"
    );
    assert!(env.prefix_path("bin/foo").exists());
    assert!(env.config.formula_logs("foo").join("01.mkdir").is_file());
    assert!(!Tab::read(&keg).unwrap().poured_from_bottle);
}

#[tokio::test]
async fn test_failed_build_leaves_no_keg() {
    let env = TestEnvironment::new();
    from_source(
        &env,
        "broken",
        &["mkdir -p \"$PREFIX/bin\"", "echo 'no rule to make target' >&2; exit 2"],
    );

    match install(&env, "broken").await.unwrap_err() {
        TaproomError::Build { formula, failure } => {
            assert_eq!(formula, "broken");
            assert_eq!(failure.kind, "step_failed");
            assert_eq!(failure.fields.get("exit_code").map(String::as_str), Some("2"));
            let log = failure.fields.get("log").unwrap();
            assert!(fs::read_to_string(log).unwrap().contains("no rule to make target"));
        }
        other => panic!("expected a build failure, got {}", other),
    }

    assert!(!env.config.rack("broken").exists());
    assert!(cellar::linked_keg(&env.config, "broken").is_none());
    assert!(env.config.linked_keg_record("broken").symlink_metadata().is_err());
}

#[tokio::test]
async fn test_build_installing_nothing_is_an_empty_installation() {
    let env = TestEnvironment::new();
    from_source(&env, "hollow", &["true"]);

    assert!(matches!(
        install(&env, "hollow").await,
        Err(TaproomError::EmptyInstallation { .. })
    ));
    assert!(!env.config.rack("hollow").exists());
}

#[tokio::test]
async fn test_dependencies_installed_first_and_recorded() {
    let env = TestEnvironment::new();
    bottled(&env, "libb", "1.0", &[]);
    bottled(&env, "appa", "1.0", &["libb"]);

    match install(&env, "appa").await.unwrap() {
        InstallOutcome::Installed { dependencies, .. } => {
            assert_eq!(dependencies, vec!["libb"]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let dep_tab = Tab::read(&env.config.rack("libb").join("1.0")).unwrap();
    assert!(!dep_tab.installed_on_request);
    let tab = Tab::read(&env.config.rack("appa").join("1.0")).unwrap();
    assert_eq!(tab.runtime_dependencies.len(), 1);
    assert_eq!(tab.runtime_dependencies[0].full_name, "libb");
    assert!(cellar::is_linked(&env.config, "libb"));
}

#[tokio::test]
async fn test_second_install_is_a_no_op() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);

    let mut installer = env.installer();
    installer
        .install("hello", &Options::new(), &InstallFlags::default())
        .await
        .unwrap();

    // The same run has already handled it.
    assert!(matches!(
        installer
            .install("hello", &Options::new(), &InstallFlags::default())
            .await
            .unwrap(),
        InstallOutcome::Skipped
    ));

    match install(&env, "hello").await.unwrap() {
        InstallOutcome::AlreadyInstalled { version, linked } => {
            assert_eq!(version, "1.0");
            assert!(linked);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_held_lock_refuses_install() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);

    let held = FormulaLock::acquire(&env.config, "hello").unwrap();
    match install(&env, "hello").await.unwrap_err() {
        TaproomError::OperationInProgress { name, pid, .. } => {
            assert_eq!(name, "hello");
            assert_eq!(pid, Some(std::process::id()));
        }
        other => panic!("expected operation in progress, got {}", other),
    }
    assert!(!env.config.rack("hello").exists());

    drop(held);
    assert!(install(&env, "hello").await.is_ok());
}

#[tokio::test]
async fn test_locks_released_after_install() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);

    install(&env, "hello").await.unwrap();
    assert!(FormulaLock::acquire(&env.config, "hello").is_ok());
}

#[tokio::test]
async fn test_keg_only_gets_opt_link_only() {
    let env = TestEnvironment::new();
    let (path, sha) = env.bottle("openssl", "3.3", &[("bin/openssl", "#!/bin/sh\n")]);
    env.write_formula(json!({
        "name": "openssl",
        "version": "3.3",
        "bottle": bottle_stanza(&path, &sha),
        "keg_only": {"reason": ":provided_by_macos"},
    }));

    match install(&env, "openssl").await.unwrap() {
        InstallOutcome::Installed { caveats, .. } => {
            assert!(caveats.unwrap().contains("keg-only"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(env.prefix_path("bin/openssl").symlink_metadata().is_err());
    assert!(cellar::linked_keg(&env.config, "openssl").is_none());
    assert_eq!(
        cellar::opt_keg(&env.config, "openssl"),
        Some(env.config.rack("openssl").join("3.3"))
    );
}

#[tokio::test]
async fn test_linked_conflict_refuses_install() {
    let env = TestEnvironment::new();
    bottled(&env, "mawk", "1.0", &[]);
    let (path, sha) = env.bottle("gawk", "5.3", &[("bin/gawk", "#!/bin/sh\n")]);
    env.write_formula(json!({
        "name": "gawk",
        "version": "5.3",
        "bottle": bottle_stanza(&path, &sha),
        "conflicts_with": [{"name": "mawk", "reason": "both install awk"}],
    }));

    install(&env, "mawk").await.unwrap();
    match install(&env, "gawk").await.unwrap_err() {
        TaproomError::Conflict { formula, conflicts } => {
            assert_eq!(formula, "gawk");
            assert_eq!(conflicts[0].name, "mawk");
        }
        other => panic!("expected a conflict, got {}", other),
    }
    assert!(!env.config.rack("gawk").exists());

    let force = InstallFlags {
        force: true,
        ..Default::default()
    };
    env.installer()
        .install("gawk", &Options::new(), &force)
        .await
        .unwrap();
    assert!(cellar::is_linked(&env.config, "gawk"));
}

#[tokio::test]
async fn test_bad_bottle_falls_back_to_source() {
    let env = TestEnvironment::new();
    let (bottle, _) = env.bottle("fallback", "1.0", &[("bin/fallback", "bottled")]);
    let (source, sha) = env.source("fallback", "1.0", &[("fallback", "built")]);
    env.write_formula(json!({
        "name": "fallback",
        "version": "1.0",
        "url": format!("file://{}", source.display()),
        "sha256": sha,
        "bottle": bottle_stanza(&bottle, "0000"),
        "install": ["mkdir -p \"$PREFIX/bin\"", "cp fallback \"$PREFIX/bin/\""],
    }));

    match install(&env, "fallback").await.unwrap() {
        InstallOutcome::Installed { poured, .. } => assert!(!poured),
        other => panic!("unexpected outcome: {:?}", other),
    }
    let keg = env.config.rack("fallback").join("1.0");
    assert_eq!(fs::read_to_string(keg.join("bin/fallback")).unwrap(), "built");
}

#[tokio::test]
async fn test_failed_reinstall_restores_previous_keg() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);
    install(&env, "hello").await.unwrap();

    let (source, sha) = env.source("hello", "1.0", &[("README", "")]);
    env.write_formula(json!({
        "name": "hello",
        "version": "1.0",
        "url": format!("file://{}", source.display()),
        "sha256": sha,
        "install": ["exit 1"],
    }));

    let force = InstallFlags {
        force: true,
        ..Default::default()
    };
    let result = env.installer().install("hello", &Options::new(), &force).await;
    assert!(matches!(result, Err(TaproomError::Build { .. })));

    let keg = env.config.rack("hello").join("1.0");
    assert!(keg.join("bin/hello").is_file());
    assert!(!env.config.rack("hello").join("1.0.tmp").exists());
    assert_eq!(cellar::linked_keg(&env.config, "hello"), Some(keg));
}

#[tokio::test]
async fn test_post_install_runs_in_keg() {
    let env = TestEnvironment::new();
    let (path, sha) = env.bottle("svc", "1.0", &[("bin/svc", "#!/bin/sh\n")]);
    env.write_formula(json!({
        "name": "svc",
        "version": "1.0",
        "bottle": bottle_stanza(&path, &sha),
        "post_install": ["echo \"$PREFIX\" > post-install.out", "exit 4"],
    }));

    install(&env, "svc").await.unwrap();
    let keg = env.config.rack("svc").join("1.0");
    assert_eq!(
        fs::read_to_string(keg.join("post-install.out")).unwrap().trim(),
        keg.display().to_string()
    );
    // A failing post-install step only warns.
    assert!(cellar::is_linked(&env.config, "svc"));
}

#[tokio::test]
async fn test_dry_run_installs_nothing() {
    let env = TestEnvironment::new();
    bottled(&env, "libb", "1.0", &[]);
    bottled(&env, "appa", "1.0", &["libb"]);

    let flags = InstallFlags {
        dry_run: true,
        ..Default::default()
    };
    match env
        .installer()
        .install("appa", &Options::new(), &flags)
        .await
        .unwrap()
    {
        InstallOutcome::Planned(plan) => assert_eq!(plan.names(), vec!["libb", "appa"]),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!env.config.rack("libb").exists());
    assert!(!env.config.rack("appa").exists());
}

#[tokio::test]
async fn test_only_dependencies_skips_requested() {
    let env = TestEnvironment::new();
    bottled(&env, "libb", "1.0", &[]);
    bottled(&env, "appa", "1.0", &["libb"]);

    let flags = InstallFlags {
        only_dependencies: true,
        ..Default::default()
    };
    let outcome = env
        .installer()
        .install("appa", &Options::new(), &flags)
        .await
        .unwrap();
    assert!(matches!(outcome, InstallOutcome::DependenciesOnly { ref dependencies } if dependencies == &["libb"]));
    assert!(env.config.rack("libb").join("1.0").is_dir());
    assert!(!env.config.rack("appa").exists());
}

#[tokio::test]
async fn test_uninstall_refused_while_depended_on() {
    let env = TestEnvironment::new();
    bottled(&env, "libb", "1.0", &[]);
    bottled(&env, "appa", "1.0", &["libb"]);
    install(&env, "appa").await.unwrap();

    let mut installer = env.installer();
    match installer.uninstall("libb", false).unwrap_err() {
        TaproomError::HasDependents { name, dependents } => {
            assert_eq!(name, "libb");
            assert_eq!(dependents, vec!["appa"]);
        }
        other => panic!("expected dependents, got {}", other),
    }
    assert!(cellar::is_linked(&env.config, "libb"));

    let report = installer.uninstall("appa", false).unwrap();
    assert_eq!(report.removed, vec![env.config.rack("appa").join("1.0")]);
    assert!(report.remaining.is_empty());
    installer.uninstall("libb", false).unwrap();
    assert!(!env.config.rack("libb").exists());
    assert!(env.prefix_path("bin/libb").symlink_metadata().is_err());
}

#[tokio::test]
async fn test_uninstall_unknown_keg() {
    let env = TestEnvironment::new();
    assert!(matches!(
        env.installer().uninstall("ghost", false),
        Err(TaproomError::NoSuchKeg(name)) if name == "ghost"
    ));
}

#[tokio::test]
async fn test_upgrade_installs_new_version_and_keeps_old() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);
    install(&env, "hello").await.unwrap();

    bottled(&env, "hello", "2.0", &[]);
    let mut installer = env.installer();
    assert_eq!(
        installer.outdated().unwrap(),
        vec![("hello".to_string(), "1.0".to_string(), "2.0".to_string())]
    );

    match installer.upgrade("hello", &InstallFlags::default()).await.unwrap() {
        UpgradeOutcome::Upgraded { from, to, .. } => {
            assert_eq!(from, "1.0");
            assert_eq!(to, "2.0");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(
        cellar::linked_keg(&env.config, "hello"),
        Some(env.config.rack("hello").join("2.0"))
    );
    assert!(env.config.rack("hello").join("1.0").is_dir());
    assert!(installer.outdated().unwrap().is_empty());

    match env
        .installer()
        .upgrade("hello", &InstallFlags::default())
        .await
        .unwrap()
    {
        UpgradeOutcome::UpToDate { version } => assert_eq!(version, "2.0"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_upgrade_relinks_old_keg() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);
    install(&env, "hello").await.unwrap();

    let (source, sha) = env.source("hello", "2.0", &[("README", "")]);
    env.write_formula(json!({
        "name": "hello",
        "version": "2.0",
        "url": format!("file://{}", source.display()),
        "sha256": sha,
        "install": ["exit 1"],
    }));

    let result = env.installer().upgrade("hello", &InstallFlags::default()).await;
    assert!(result.is_err());
    assert_eq!(
        cellar::linked_keg(&env.config, "hello"),
        Some(env.config.rack("hello").join("1.0"))
    );
    assert!(!env.config.rack("hello").join("2.0").exists());
}

fn rack_entries(env: &TestEnvironment, name: &str) -> Vec<String> {
    let mut entries: Vec<String> = fs::read_dir(env.config.rack(name))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();
    entries
}

#[tokio::test]
async fn test_misnamed_bottle_leaves_no_stray_keg() {
    let env = TestEnvironment::new();
    let (bottle, bottle_sha) = env.bottle("bar", "0.9", &[("bin/bar", "bottled")]);
    let (source, sha) = env.source("bar", "1.0", &[("bar", "built")]);
    env.write_formula(json!({
        "name": "bar",
        "version": "1.0",
        "url": format!("file://{}", source.display()),
        "sha256": sha,
        "bottle": bottle_stanza(&bottle, &bottle_sha),
        "install": ["mkdir -p \"$PREFIX/bin\"", "cp bar \"$PREFIX/bin/\""],
    }));

    match install(&env, "bar").await.unwrap() {
        InstallOutcome::Installed { poured, .. } => assert!(!poured),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(rack_entries(&env, "bar"), vec!["1.0"]);
    let hidden: Vec<_> = fs::read_dir(&env.config.cellar)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(hidden.is_empty());
}

#[tokio::test]
async fn test_bottle_for_wrong_revision_does_not_adopt_old_keg() {
    let env = TestEnvironment::new();
    let (old_bottle, old_sha) = env.bottle("foo", "1.0_1", &[("bin/foo", "old revision")]);
    env.write_formula(json!({
        "name": "foo",
        "version": "1.0",
        "revision": 1,
        "bottle": bottle_stanza(&old_bottle, &old_sha),
    }));
    install(&env, "foo").await.unwrap();

    // The new revision ships a bottle laid out for the unrevised version.
    let (bottle, bottle_sha) = env.bottle("foo", "1.0", &[("bin/foo", "wrong layout")]);
    let (source, sha) = env.source("foo", "1.0", &[("foo", "new revision")]);
    env.write_formula(json!({
        "name": "foo",
        "version": "1.0",
        "revision": 2,
        "url": format!("file://{}", source.display()),
        "sha256": sha,
        "bottle": bottle_stanza(&bottle, &bottle_sha),
        "install": ["mkdir -p \"$PREFIX/bin\"", "cp foo \"$PREFIX/bin/\""],
    }));

    match env
        .installer()
        .upgrade("foo", &InstallFlags::default())
        .await
        .unwrap()
    {
        UpgradeOutcome::Upgraded { from, to, outcome } => {
            assert_eq!(from, "1.0_1");
            assert_eq!(to, "1.0_2");
            match outcome {
                InstallOutcome::Installed { keg, poured, .. } => {
                    assert_eq!(keg, env.config.rack("foo").join("1.0_2"));
                    assert!(!poured);
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(rack_entries(&env, "foo"), vec!["1.0_1", "1.0_2"]);
    assert_eq!(fs::read_to_string(env.prefix_path("bin/foo")).unwrap(), "new revision");
    assert_eq!(
        fs::read_to_string(env.config.rack("foo").join("1.0_1/bin/foo")).unwrap(),
        "old revision"
    );
}

#[tokio::test]
async fn test_interrupted_build_discards_keg() {
    let env = TestEnvironment::new();
    from_source(
        &env,
        "intr",
        &["mkdir -p \"$PREFIX/bin\"", "cp intr \"$PREFIX/bin/\"", "kill -INT $PPID"],
    );

    let err = install(&env, "intr").await.unwrap_err();
    assert!(err.is_interrupt(), "expected an interrupt, got {}", err);
    assert!(matches!(err, TaproomError::Interrupted { ref formula } if formula == "intr"));
    assert!(!env.config.rack("intr").exists());
    assert!(cellar::linked_keg(&env.config, "intr").is_none());
    assert!(env.prefix_path("bin/intr").symlink_metadata().is_err());
    assert!(FormulaLock::acquire(&env.config, "intr").is_ok());
}

#[tokio::test]
async fn test_interrupt_before_pour_installs_nothing() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);

    let mut installer = env.installer();
    installer.interrupt().trigger();
    let err = installer
        .install("hello", &Options::new(), &InstallFlags::default())
        .await
        .unwrap_err();
    assert!(err.is_interrupt());
    assert!(!env.config.rack("hello").exists());
    assert!(cellar::linked_keg(&env.config, "hello").is_none());
}

#[tokio::test]
async fn test_interrupted_reinstall_restores_previous_keg() {
    let env = TestEnvironment::new();
    bottled(&env, "hello", "1.0", &[]);
    install(&env, "hello").await.unwrap();

    let mut installer = env.installer();
    installer.interrupt().trigger();
    let force = InstallFlags {
        force: true,
        ..Default::default()
    };
    let err = installer.install("hello", &Options::new(), &force).await.unwrap_err();
    assert!(err.is_interrupt());

    let keg = env.config.rack("hello").join("1.0");
    assert!(keg.join("bin/hello").is_file());
    assert_eq!(rack_entries(&env, "hello"), vec!["1.0"]);
    assert_eq!(cellar::linked_keg(&env.config, "hello"), Some(keg));
}
