use pkgres::{ActiveRegistry, Config, Error, Finder, RealRuntime, RemovalState, StagedRemoval};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;
use zip::ZipWriter;
use zip::write::FileOptions;

struct Layout {
    config: Config,
    site: PathBuf,
    package: PathBuf,
    info: PathBuf,
    script: PathBuf,
    bundle: PathBuf,
}

fn install(prefix: &Path) -> Layout {
    let config = Config::with_prefix(prefix);
    let site = prefix.join("lib");
    let package = site.join("demo");
    let info = site.join("demo-1.0.artifact-info");
    fs::create_dir_all(package.join("assets")).unwrap();
    fs::create_dir_all(&info).unwrap();
    fs::create_dir_all(&config.bin_dir).unwrap();

    fs::write(package.join("core"), "core").unwrap();
    fs::write(package.join("assets").join("logo"), "logo").unwrap();
    fs::write(info.join("METADATA"), "Version: 1.0\n").unwrap();
    fs::write(
        info.join("installed-files.txt"),
        "../demo/core\n../demo/assets/logo\n../demo\n",
    )
    .unwrap();
    fs::write(
        info.join("entry_points.txt"),
        "[console_scripts]\ndemo = demo.cli:main\n",
    )
    .unwrap();
    let script = config.bin_dir.join("demo");
    fs::write(&script, "#!/bin/sh\n").unwrap();

    let bundle = site.join("extra-0.2.artifact");
    let mut zip = ZipWriter::new(File::create(&bundle).unwrap());
    let options: FileOptions<()> = FileOptions::default();
    zip.start_file("ARTIFACT-INFO/METADATA", options).unwrap();
    zip.write_all(b"Version: 0.2\n").unwrap();
    zip.finish().unwrap();
    fs::write(site.join("artifacts.entries"), "# bundles\n./extra-0.2.artifact\n").unwrap();

    Layout {
        config,
        site,
        package,
        info,
        script,
        bundle,
    }
}

#[test_log::test]
fn test_remove_installed_then_roll_back() {
    let prefix = tempdir().unwrap();
    let layout = install(prefix.path());
    let registry = ActiveRegistry::with_entries(
        Finder::new(Arc::new(RealRuntime), &layout.config),
        &[layout.site.clone()],
    );

    let mut removal =
        StagedRemoval::for_artifact(&RealRuntime, &registry, "demo", &layout.config).unwrap();
    assert_eq!(
        removal.plan().paths,
        vec![layout.script.clone(), layout.package.clone(), layout.info.clone()]
    );
    assert!(removal.confirm(true).unwrap());
    removal.stage().unwrap();

    assert!(!layout.package.exists());
    assert!(!layout.info.exists());
    assert!(!layout.script.exists());

    removal.rollback().unwrap();
    assert_eq!(removal.state(), RemovalState::RolledBack);
    assert_eq!(
        fs::read_to_string(layout.package.join("assets").join("logo")).unwrap(),
        "logo"
    );
    assert!(layout.info.join("METADATA").exists());
    assert!(layout.script.exists());

    // nothing was lost, so the artifact is still found
    let rescanned = ActiveRegistry::with_entries(
        Finder::new(Arc::new(RealRuntime), &layout.config),
        &[layout.site.clone()],
    );
    assert!(rescanned.get("demo").is_some());
}

#[test]
fn test_remove_bundle_and_commit() {
    let prefix = tempdir().unwrap();
    let layout = install(prefix.path());
    let registry = ActiveRegistry::with_entries(
        Finder::new(Arc::new(RealRuntime), &layout.config),
        &[layout.site.clone()],
    );
    assert!(registry.get("extra").is_some());

    let mut removal =
        StagedRemoval::for_artifact(&RealRuntime, &registry, "extra", &layout.config).unwrap();
    assert!(removal.confirm(true).unwrap());
    removal.stage().unwrap();
    removal.commit().unwrap();

    assert!(!layout.bundle.exists());
    assert_eq!(
        fs::read_to_string(layout.site.join("artifacts.entries")).unwrap(),
        "# bundles\n"
    );
    let staging = removal.staging_dir().unwrap();
    assert!(!staging.exists());

    let rescanned = ActiveRegistry::with_entries(
        Finder::new(Arc::new(RealRuntime), &layout.config),
        &[layout.site.clone()],
    );
    assert!(rescanned.get("extra").is_none());
    assert!(rescanned.get("demo").is_some());
}

#[test]
fn test_remove_inactive_name_fails() {
    let prefix = tempdir().unwrap();
    let layout = install(prefix.path());
    let registry = ActiveRegistry::with_entries(
        Finder::new(Arc::new(RealRuntime), &layout.config),
        &[layout.site.clone()],
    );

    let err = StagedRemoval::for_artifact(&RealRuntime, &registry, "missing", &layout.config)
        .err()
        .unwrap();
    assert!(matches!(err, Error::Uninstallation(_)));
}

#[test]
fn test_nothing_outside_prefix_is_touched() {
    let prefix = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();
    let layout = install(prefix.path());
    let mut config = layout.config.clone();
    config.bin_dir = elsewhere.path().to_path_buf();
    let foreign_script = elsewhere.path().join("demo");
    fs::write(&foreign_script, "#!/bin/sh\n").unwrap();

    let registry = ActiveRegistry::with_entries(
        Finder::new(Arc::new(RealRuntime), &config),
        &[layout.site.clone()],
    );
    let mut removal =
        StagedRemoval::for_artifact(&RealRuntime, &registry, "demo", &config).unwrap();
    assert_eq!(removal.plan().refused, vec![foreign_script.clone()]);

    removal.confirm(true).unwrap();
    removal.stage().unwrap();
    removal.commit().unwrap();
    assert!(foreign_script.exists());
    assert!(!layout.package.exists());
}
