use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_core::error::StrataError;
use strata_core::prelude::*;
use tempfile::TempDir;

const SCHEMA: &str = r#"
[types.App]
default_scopes = ["global"]

[types.App.properties.port]
kind = "simple"
type = "u16"
merge = "max-int"

[types.App.properties.db]
kind = "simple"
type = "string"
reference = { target = "Db" }

[types.Db]
default_scopes = ["global"]

[types.Db.properties.url]
kind = "simple"
type = "string"
"#;

const CYCLIC_SCHEMA: &str = r#"
[types.App.properties.db]
kind = "simple"
type = "string"
reference = { target = "Db" }

[types.Db.properties.owner]
kind = "simple"
type = "string"
reference = { target = "App" }
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn store_root(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    fn settings(&self) -> PathBuf {
        let root = self.store_root();
        self.write(
            "strata.toml",
            &format!("[cache]\ncapacity = 8\n\n[store]\nroot = {:?}\n", root.to_str().unwrap()),
        )
    }

    fn context(&self, schema: &str) -> AppContext {
        let settings = self.settings();
        let schema = self.write("schema.toml", schema);
        AppContext::from_files(&settings, &schema).unwrap()
    }
}

fn app(port: &str) -> ConfigNode {
    let scratch: ScopePath = "class[name=App]".parse().unwrap();
    ConfigNode::complex(&scratch, "App")
        .with_property("port", ConfigNode::simple(&scratch, "u16", Some(port)))
}

fn snapshot_count(root: &Path) -> usize {
    fs::read_dir(root)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|ext| ext == "json")
        })
        .count()
}

#[test]
fn context_wires_settings_schema_and_store() {
    let fixture = Fixture::new();
    let ctx = fixture.context(SCHEMA);

    assert_eq!(ctx.settings().cache.capacity, 8);
    assert_eq!(ctx.store_root().unwrap(), fixture.store_root());
    assert_eq!(ctx.schema().types().count(), 2);
    ctx.cycle_detector().check_all().unwrap();

    let service = ctx.config_service(Arc::new(ctx.file_backend().unwrap()));
    assert_eq!(service.cache().capacity(), 8);

    let global: ScopePath = "class[name=App]/default/global".parse().unwrap();
    let alice: ScopePath = "class[name=App]/default/global/user[name=alice]"
        .parse()
        .unwrap();
    service.save(&global, "App", &app("8080")).unwrap();
    service.save(&alice, "App", &app("443")).unwrap();
    assert_eq!(snapshot_count(&fixture.store_root()), 2);

    // max-int keeps the larger of the global and user ports
    let resolved = service.load(&alice, "App").unwrap().unwrap();
    assert_eq!(resolved.node.lookup("port").and_then(ConfigNode::simple_value), Some("8080"));
}

#[test]
fn unregistered_or_misordered_scopes_are_rejected() {
    let fixture = Fixture::new();
    let ctx = fixture.context(SCHEMA);
    let service = ctx.config_service(Arc::new(MemoryBackend::new()));

    for text in [
        "class[name=App]/default/team[name=core]",
        "class[name=App]/default/user[name=alice]/global",
        "class[name=App]/default/user",
    ] {
        let path: ScopePath = text.parse().unwrap();
        let err = service.load(&path, "App").unwrap_err();
        assert!(matches!(err, StrataError::InvalidScope(_)), "{text}: {err}");
    }
}

#[test]
fn cyclic_references_are_reported() {
    let fixture = Fixture::new();
    let ctx = fixture.context(CYCLIC_SCHEMA);

    let err = ctx.cycle_detector().check_type("App").unwrap_err();
    assert!(err.to_string().contains("App@class[name=App]/default"), "{err}");
}

#[test]
fn broken_schema_file_names_the_file() {
    let fixture = Fixture::new();
    let settings = fixture.settings();
    let schema = fixture.write("schema.toml", "[types.App.properties.port]\nkind = \"simple\"\n");

    let err = AppContext::from_files(&settings, &schema).unwrap_err();
    assert!(format!("{err:#}").contains("schema.toml"), "{err:#}");
}
