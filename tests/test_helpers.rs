// Test helpers for isolated testing
// Every environment lives in its own temporary prefix and never touches the system
#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use taproom::config::Config;
use taproom::formulary::Formulary;
use taproom::install::Installer;
use taproom::platform::UNIVERSAL_TAG;
use taproom::requirement::StaticProbe;
use tempfile::TempDir;

/// Isolated prefix with its own Cellar, formula repository and download cache.
/// Removed when dropped.
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub prefix: PathBuf,
    pub config: Config,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefix = temp_dir.path().join("prefix");
        let config = Config::for_prefix(&prefix).with_worker(env!("CARGO_BIN_EXE_taproom"));

        fs::create_dir_all(&config.cellar).unwrap();
        fs::create_dir_all(config.core_formula_dir()).unwrap();

        Self {
            temp_dir,
            prefix,
            config,
        }
    }

    /// Scratch space outside the prefix.
    pub fn scratch(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("scratch");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn formulary(&self) -> Formulary {
        Formulary::new(&self.config)
    }

    /// Installer that pours universal bottles and sees no optional system tools.
    pub fn installer(&self) -> Installer {
        Installer::new(self.config.clone(), UNIVERSAL_TAG).with_probe(StaticProbe::new())
    }

    pub fn write_formula(&self, definition: Value) {
        let name = definition["name"].as_str().expect("formula needs a name");
        let path = self.config.core_formula_dir().join(format!("{}.json", name));
        fs::write(path, serde_json::to_string_pretty(&definition).unwrap()).unwrap();
    }

    pub fn write_tap_formula(&self, tap: &str, definition: Value) {
        let name = definition["name"].as_str().expect("formula needs a name");
        let dir = self.config.taps_dir().join(tap).join("Formula");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{}.json", name)),
            serde_json::to_string_pretty(&definition).unwrap(),
        )
        .unwrap();
    }

    /// A bottle laid out as `<name>/<version>/<files>`. Returns its path and checksum.
    pub fn bottle(&self, name: &str, version: &str, files: &[(&str, &str)]) -> (PathBuf, String) {
        let staging = self.scratch().join(format!("{}-{}-bottle", name, version));
        write_files(&staging, files);

        let path = self
            .scratch()
            .join(format!("{}--{}.{}.bottle.tar.gz", name, version, UNIVERSAL_TAG));
        tarball(&path, &format!("{}/{}", name, version), &staging);
        let sha = sha256(&path);
        (path, sha)
    }

    /// A source tarball wrapping `files` in a `<name>-<version>/` directory.
    pub fn source(&self, name: &str, version: &str, files: &[(&str, &str)]) -> (PathBuf, String) {
        let top = format!("{}-{}", name, version);
        let staging = self.scratch().join(format!("{}-src", top));
        write_files(&staging, files);

        let path = self.scratch().join(format!("{}.tar.gz", top));
        tarball(&path, &top, &staging);
        let sha = sha256(&path);
        (path, sha)
    }

    /// A keg in the Cellar with the given files, not linked.
    pub fn keg(&self, name: &str, version: &str, files: &[(&str, &str)]) -> PathBuf {
        let keg = self.config.rack(name).join(version);
        write_files(&keg, files);
        keg
    }

    pub fn prefix_path(&self, relative: &str) -> PathBuf {
        self.prefix.join(relative)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(root).unwrap();
    for (relative, contents) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

fn tarball(path: &Path, top: &str, contents: &Path) {
    let encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.append_dir_all(top, contents).unwrap();
    tar.into_inner().unwrap().finish().unwrap();
}

pub fn sha256(path: &Path) -> String {
    format!("{:x}", Sha256::digest(fs::read(path).unwrap()))
}

/// Bottle stanza for a formula definition pointing at a local file.
pub fn bottle_stanza(path: &Path, sha: &str) -> Value {
    serde_json::json!({
        "files": {
            UNIVERSAL_TAG: { "cellar": ":any", "url": format!("file://{}", path.display()), "sha256": sha }
        }
    })
}
