use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::fs;
use std::path::Path;
use taproom::config::Config;
use taproom::install::{InstallFlags, Installer};
use taproom::options::Options;
use taproom::platform::UNIVERSAL_TAG;
use taproom::requirement::StaticProbe;
use taproom::{normalize_path, relative_path};

fn bench_normalize_path(c: &mut Criterion) {
    let test_paths = vec![
        Path::new("foo/bar/../baz"),
        Path::new("./foo/./bar"),
        Path::new("foo/../../bar"),
        Path::new("/usr/local/bin/../lib"),
        Path::new("a/b/c/../../d"),
    ];

    c.bench_function("normalize_path", |b| {
        b.iter(|| {
            for path in &test_paths {
                let _ = normalize_path(black_box(path));
            }
        })
    });
}

fn bench_relative_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("relative_path");

    let cases = [
        ("bin", Path::new("/opt/taproom/bin"), Path::new("/opt/taproom/Cellar/wget/1.24.5/bin/wget")),
        (
            "man",
            Path::new("/opt/taproom/share/man/man1"),
            Path::new("/opt/taproom/Cellar/wget/1.24.5/share/man/man1/wget.1"),
        ),
        ("record", Path::new("/opt/taproom/Library/LinkedKegs"), Path::new("/opt/taproom/Cellar/wget/1.24.5")),
    ];

    for (label, from, to) in cases {
        group.bench_with_input(BenchmarkId::new(label, 0), &(from, to), |b, (from, to)| {
            b.iter(|| relative_path(black_box(from), black_box(to)))
        });
    }

    group.finish();
}

/// A layered graph where every formula depends on all formulae one layer down.
fn write_layered_formulae(dir: &Path, layers: usize, width: usize) {
    for layer in 0..layers {
        for i in 0..width {
            let deps: Vec<serde_json::Value> = if layer + 1 < layers {
                (0..width)
                    .map(|j| serde_json::json!({"name": format!("f{}-{}", layer + 1, j)}))
                    .collect()
            } else {
                Vec::new()
            };
            let definition = serde_json::json!({
                "name": format!("f{}-{}", layer, i),
                "version": "1.0",
                "dependencies": deps,
            });
            fs::write(
                dir.join(format!("f{}-{}.json", layer, i)),
                definition.to_string(),
            )
            .expect("write formula");
        }
    }
    let root = serde_json::json!({
        "name": "root",
        "version": "1.0",
        "dependencies": (0..width).map(|j| serde_json::json!({"name": format!("f0-{}", j)})).collect::<Vec<_>>(),
    });
    fs::write(dir.join("root.json"), root.to_string()).expect("write formula");
}

fn bench_expansion(c: &mut Criterion) {
    let temp = tempfile::TempDir::new().expect("temp dir");
    let config = Config::for_prefix(temp.path());
    fs::create_dir_all(config.core_formula_dir()).expect("formula dir");
    write_layered_formulae(&config.core_formula_dir(), 6, 8);

    let installer = Installer::new(config, UNIVERSAL_TAG).with_probe(StaticProbe::new());
    let flags = InstallFlags::default();
    let options = Options::new();

    c.bench_function("expand layered graph", |b| {
        b.iter(|| {
            let root = installer.formulary().load("root").expect("root formula");
            black_box(installer.plan(root, &options, &flags).expect("plan"))
        })
    });
}

criterion_group!(benches, bench_normalize_path, bench_relative_path, bench_expansion);
criterion_main!(benches);
