//! Rollback-capable removal of installed artifacts.
//!
//! A removal is planned first: paths and entries-file lines are collected,
//! anything outside the permitted root is refused. Once confirmed, paths are
//! moved into a staging directory inside the root and entries files are
//! rewritten. The result is either committed (staging deleted) or rolled back
//! (everything moved and rewritten back).
//!
//! ```text
//! Planning -> Confirmed -> Staged -> Committed
//!                                 -> RolledBack
//! ```

mod entries;
mod plan;

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::runtime::{Runtime, is_path_under, normalize_path, relative_path_from_dir};

/// Prefix of staging directories created inside the permitted root.
pub const STAGING_PREFIX: &str = ".pkgres-removal-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalState {
    Planning,
    Confirmed,
    Staged,
    Committed,
    RolledBack,
}

impl fmt::Display for RemovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Planning => "planning",
            Self::Confirmed => "confirmed",
            Self::Staged => "staged",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// What a removal will do (or did), for display and serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalPlan {
    pub state: RemovalState,
    pub root: PathBuf,
    /// Paths to move, ancestors first, nested paths folded into them.
    pub paths: Vec<PathBuf>,
    /// Paths outside the root that will not be touched.
    pub refused: Vec<PathBuf>,
    /// Lines to drop, per entries file.
    pub entries: BTreeMap<PathBuf, Vec<String>>,
}

pub struct StagedRemoval<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
    state: RemovalState,
    paths: BTreeSet<PathBuf>,
    refused: BTreeSet<PathBuf>,
    entries: BTreeMap<PathBuf, BTreeSet<String>>,
    staging_dir: Option<PathBuf>,
    /// `(original, staged)` pairs in move order.
    moved: Vec<(PathBuf, PathBuf)>,
    /// Entries files rewritten so far, with their original bytes.
    saved_entries: Vec<(PathBuf, Vec<u8>)>,
}

impl<'a, R: Runtime> StagedRemoval<'a, R> {
    /// An empty plan that only removes paths under `permitted_root`.
    pub fn new(runtime: &'a R, permitted_root: &Path) -> Self {
        Self {
            runtime,
            root: normalize_path(permitted_root),
            state: RemovalState::Planning,
            paths: BTreeSet::new(),
            refused: BTreeSet::new(),
            entries: BTreeMap::new(),
            staging_dir: None,
            moved: Vec::new(),
            saved_entries: Vec::new(),
        }
    }

    pub fn state(&self) -> RemovalState {
        self.state
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> Option<&Path> {
        self.staging_dir.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.entries.is_empty()
    }

    fn expect_state(&self, operation: &'static str, expected: RemovalState) -> Result<()> {
        if self.state != expected {
            return Err(Error::RemovalState {
                operation,
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Whether `path` lies strictly inside the root, both lexically and
    /// once symlinks in its ancestors are resolved. The last component is
    /// not followed, so a symlink inside the root can itself be removed.
    fn permitted(&self, path: &Path) -> bool {
        if path == self.root || !is_path_under(path, &self.root) {
            return false;
        }
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        match (
            self.runtime.canonicalize(&self.root),
            self.runtime.canonicalize(parent),
        ) {
            (Ok(root), Ok(parent)) => {
                let resolved = parent.join(name);
                resolved != root && resolved.starts_with(&root)
            }
            (Err(err), _) | (_, Err(err)) => {
                debug!("Cannot resolve {:?} against {:?}: {:#}", path, self.root, err);
                false
            }
        }
    }

    /// Plan the removal of `path`. Missing paths are skipped; paths outside
    /// the permitted root are recorded as refused.
    pub fn add(&mut self, path: &Path) -> Result<()> {
        self.expect_state("add", RemovalState::Planning)?;
        let path = normalize_path(path);
        if !self.runtime.exists(&path) {
            debug!("Nothing to remove at {:?}", path);
            return Ok(());
        }
        if !self.permitted(&path) {
            warn!("Refusing to remove {:?} outside {:?}", path, self.root);
            self.refused.insert(path);
            return Ok(());
        }
        self.paths.insert(path);
        Ok(())
    }

    /// Plan the removal of the line naming `entry` from `entries_file`.
    pub fn add_entry(&mut self, entries_file: &Path, entry: &str) -> Result<()> {
        self.expect_state("add_entry", RemovalState::Planning)?;
        let file = normalize_path(entries_file);
        if !self.runtime.exists(&file) {
            debug!("No entries file at {:?}", file);
            return Ok(());
        }
        if !self.permitted(&file) {
            warn!("Refusing to edit {:?} outside {:?}", file, self.root);
            self.refused.insert(file);
            return Ok(());
        }
        self.entries.entry(file).or_default().insert(entry.to_string());
        Ok(())
    }

    /// Planned paths with every path below another planned path dropped.
    fn compacted(&self) -> Vec<PathBuf> {
        let mut result: Vec<PathBuf> = Vec::new();
        // BTreeSet order puts ancestors right before their descendants
        for path in &self.paths {
            if result.last().is_some_and(|kept| path.starts_with(kept)) {
                continue;
            }
            result.push(path.clone());
        }
        result
    }

    /// `path` relative to the root, for prompts.
    fn display_path(&self, path: &Path) -> String {
        relative_path_from_dir(&self.root, path)
            .unwrap_or_else(|| path.to_path_buf())
            .display()
            .to_string()
    }

    pub fn plan(&self) -> RemovalPlan {
        RemovalPlan {
            state: self.state,
            root: self.root.clone(),
            paths: self.compacted(),
            refused: self.refused.iter().cloned().collect(),
            entries: self
                .entries
                .iter()
                .map(|(file, lines)| (file.clone(), lines.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Ask for confirmation unless `auto_confirm`. An empty plan is never confirmed.
    pub fn confirm(&mut self, auto_confirm: bool) -> Result<bool> {
        self.expect_state("confirm", RemovalState::Planning)?;
        if self.is_empty() {
            info!("Nothing to remove");
            return Ok(false);
        }

        if !auto_confirm {
            let plan = self.plan();
            info!("Would remove:");
            for path in &plan.paths {
                info!("  {}", self.display_path(path));
            }
            for (file, lines) in &plan.entries {
                info!("  {} line(s) from {}", lines.len(), self.display_path(file));
            }
            if !plan.refused.is_empty() {
                info!("Would not remove (outside {}):", self.root.display());
                for path in &plan.refused {
                    info!("  {}", path.display());
                }
            }
            let prompt = format!("Remove {} path(s)?", plan.paths.len());
            if !self.runtime.confirm(&prompt)? {
                info!("Removal cancelled");
                return Ok(false);
            }
        }

        self.state = RemovalState::Confirmed;
        Ok(true)
    }

    /// Move every planned path into a fresh staging directory and rewrite the
    /// entries files.
    ///
    /// On failure the removal stays staged so [`StagedRemoval::rollback`] can
    /// undo whatever was done.
    #[tracing::instrument(skip(self), fields(root = ?self.root))]
    pub fn stage(&mut self) -> Result<()> {
        self.expect_state("stage", RemovalState::Confirmed)?;
        let staging = self.runtime.create_staging_dir(&self.root, STAGING_PREFIX)?;
        debug!("Staging removal in {:?}", staging);
        self.staging_dir = Some(staging.clone());
        self.state = RemovalState::Staged;

        for path in self.compacted() {
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let stashed = staging.join(relative);
            if let Some(parent) = stashed.parent() {
                self.runtime.create_dir_all(parent)?;
            }
            self.runtime.rename(&path, &stashed)?;
            debug!("Staged {:?}", path);
            self.moved.push((path, stashed));
        }

        let entries = std::mem::take(&mut self.entries);
        let result = self.rewrite_entries(&entries);
        self.entries = entries;
        result?;

        info!("Staged {} path(s) for removal", self.moved.len());
        Ok(())
    }

    fn rewrite_entries(&mut self, entries: &BTreeMap<PathBuf, BTreeSet<String>>) -> Result<()> {
        for (file, lines) in entries {
            if !self.runtime.exists(file) {
                continue;
            }
            let original = self.runtime.read(file)?;
            let dir = file.parent().unwrap_or(Path::new(""));
            let updated = entries::without_entries(&original, dir, lines);
            if updated == original {
                continue;
            }
            self.saved_entries.push((file.clone(), original));
            self.runtime.write(file, &updated)?;
        }
        Ok(())
    }

    /// Staged path a removed path was moved to.
    pub fn stashed_path(&self, path: &Path) -> Option<&Path> {
        let path = normalize_path(path);
        self.moved
            .iter()
            .find(|(original, _)| *original == path)
            .map(|(_, stashed)| stashed.as_path())
    }

    /// Delete the staged paths for good.
    pub fn commit(&mut self) -> Result<()> {
        self.expect_state("commit", RemovalState::Staged)?;
        if let Some(staging) = &self.staging_dir {
            self.runtime.remove_dir_all(staging)?;
        }
        info!("Removed {} path(s)", self.moved.len());
        self.moved.clear();
        self.saved_entries.clear();
        self.state = RemovalState::Committed;
        Ok(())
    }

    /// Move staged paths back and restore entries files.
    ///
    /// A no-op once rolled back. Every step is attempted; steps that fail
    /// stay pending and the removal stays staged.
    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            RemovalState::RolledBack => return Ok(()),
            RemovalState::Staged => {}
            actual => {
                return Err(Error::RemovalState {
                    operation: "rollback",
                    expected: RemovalState::Staged,
                    actual,
                });
            }
        }

        let mut first_error = None;

        let saved = std::mem::take(&mut self.saved_entries);
        for (file, original) in saved {
            if let Err(err) = self.runtime.write(&file, &original) {
                warn!("Failed to restore {:?}: {}", file, err);
                if first_error.is_none() {
                    first_error = Some(err);
                }
                self.saved_entries.push((file, original));
            }
        }

        let moved = std::mem::take(&mut self.moved);
        for (original, stashed) in moved.into_iter().rev() {
            let restored = match original.parent() {
                Some(parent) => self.runtime.create_dir_all(parent),
                None => Ok(()),
            }
            .and_then(|()| self.runtime.rename(&stashed, &original));
            match restored {
                Ok(()) => debug!("Restored {:?}", original),
                Err(err) => {
                    warn!("Failed to restore {:?}: {}", original, err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    self.moved.insert(0, (original, stashed));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err.into());
        }

        if let Some(staging) = &self.staging_dir
            && let Err(err) = self.runtime.remove_dir_all(staging)
        {
            warn!("Failed to remove staging directory {:?}: {}", staging, err);
        }
        info!("Rolled back removal");
        self.state = RemovalState::RolledBack;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use crate::test_utils::{configure_mock_runtime_basics, test_prefix};
    use mockall::predicate::eq;
    use std::fs;
    use tempfile::tempdir;

    fn layout(root: &Path) -> (PathBuf, PathBuf) {
        let pkg = root.join("lib").join("demo");
        fs::create_dir_all(pkg.join("data")).unwrap();
        fs::write(pkg.join("mod"), "code").unwrap();
        fs::write(pkg.join("data").join("table"), "rows").unwrap();
        let info = root.join("lib").join("demo-1.0.artifact-info");
        fs::create_dir_all(&info).unwrap();
        fs::write(info.join("METADATA"), "Version: 1.0\n").unwrap();
        (pkg, info)
    }

    #[test]
    fn test_full_cycle_commit() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (pkg, info) = layout(dir.path());
        let mut removal = StagedRemoval::new(&RealRuntime, dir.path());
        removal.add(&pkg)?;
        removal.add(&pkg.join("data").join("table"))?;
        removal.add(&info)?;

        assert_eq!(removal.plan().paths.len(), 2);
        assert!(removal.confirm(true)?);
        removal.stage()?;

        assert_eq!(removal.state(), RemovalState::Staged);
        assert!(!pkg.exists());
        let stashed = removal.stashed_path(&pkg).unwrap().to_path_buf();
        assert!(stashed.starts_with(dir.path()));
        assert_eq!(fs::read_to_string(stashed.join("mod"))?, "code");

        removal.commit()?;
        assert_eq!(removal.state(), RemovalState::Committed);
        assert!(!stashed.exists());
        assert!(!info.exists());
        assert!(!removal.staging_dir().unwrap().exists());

        let err = removal.rollback().unwrap_err();
        assert!(matches!(
            err,
            Error::RemovalState {
                actual: RemovalState::Committed,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn test_full_cycle_rollback() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let (pkg, info) = layout(dir.path());
        let entries_file = dir.path().join("lib").join("artifacts.entries");
        fs::write(&entries_file, "./demo\r\n/opt/other\r\n")?;

        let mut removal = StagedRemoval::new(&RealRuntime, dir.path());
        removal.add(&pkg)?;
        removal.add(&info)?;
        removal.add_entry(&entries_file, &pkg.to_string_lossy())?;
        assert!(removal.confirm(true)?);
        removal.stage()?;

        assert!(!pkg.exists());
        assert_eq!(fs::read_to_string(&entries_file)?, "/opt/other\r\n");

        removal.rollback()?;
        assert_eq!(removal.state(), RemovalState::RolledBack);
        assert_eq!(fs::read_to_string(pkg.join("data").join("table"))?, "rows");
        assert!(info.join("METADATA").exists());
        assert_eq!(fs::read_to_string(&entries_file)?, "./demo\r\n/opt/other\r\n");
        assert!(!removal.staging_dir().unwrap().exists());

        // rolling back twice is harmless
        removal.rollback()?;
        assert!(matches!(
            removal.commit(),
            Err(Error::RemovalState { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_refused_paths_are_never_moved() -> anyhow::Result<()> {
        let root = tempdir()?;
        let outside = tempdir()?;
        let victim = outside.path().join("keep-me");
        fs::write(&victim, "precious")?;
        let (pkg, _) = layout(root.path());

        let mut removal = StagedRemoval::new(&RealRuntime, root.path());
        removal.add(&victim)?;
        removal.add(&root.path().join("lib").join("..").join("..").join("elsewhere"))?;
        removal.add(root.path())?;
        removal.add(&pkg)?;

        let plan = removal.plan();
        assert_eq!(plan.paths, vec![pkg.clone()]);
        let refused: BTreeSet<_> = plan.refused.into_iter().collect();
        assert_eq!(refused, BTreeSet::from([normalize_path(root.path()), victim.clone()]));

        removal.confirm(true)?;
        removal.stage()?;
        removal.commit()?;
        assert_eq!(fs::read_to_string(&victim)?, "precious");
        assert!(!pkg.exists());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_ancestor_outside_root_is_refused() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root)?;
        fs::create_dir_all(&outside)?;
        let victim = outside.join("precious");
        fs::write(&victim, "keep")?;
        std::os::unix::fs::symlink(&outside, root.join("lib"))?;
        // a symlink that is itself planned is moved, not its target
        let shortcut = root.join("shortcut");
        std::os::unix::fs::symlink(&victim, &shortcut)?;

        let mut removal = StagedRemoval::new(&RealRuntime, &root);
        removal.add(&root.join("lib").join("precious"))?;
        removal.add(&shortcut)?;
        fs::write(outside.join("artifacts.entries"), "./x\n")?;
        removal.add_entry(&root.join("lib").join("artifacts.entries"), "./x")?;

        let plan = removal.plan();
        assert_eq!(plan.paths, vec![shortcut.clone()]);
        assert_eq!(
            plan.refused,
            vec![
                root.join("lib").join("artifacts.entries"),
                root.join("lib").join("precious"),
            ]
        );
        assert!(plan.entries.is_empty());

        assert!(removal.confirm(true)?);
        removal.stage()?;
        removal.commit()?;

        assert!(!shortcut.is_symlink());
        assert_eq!(fs::read_to_string(&victim)?, "keep");
        assert_eq!(fs::read_to_string(outside.join("artifacts.entries"))?, "./x\n");
        Ok(())
    }

    #[test]
    fn test_entries_file_restored_after_failed_write() {
        let root = test_prefix();
        let entries_file = root.join("lib").join("artifacts.entries");
        let staging = root.join(".pkgres-removal-x");
        let original = b"./demo-1.0.artifact\n./other\n".to_vec();

        let mut runtime = MockRuntime::new();
        configure_mock_runtime_basics(&mut runtime);
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_create_staging_dir()
            .returning(move |_, _| Ok(staging.clone()));
        runtime.expect_read().with(eq(entries_file.clone())).returning({
            let original = original.clone();
            move |_| Ok(original.clone())
        });
        // the first write leaves the file in an unknown state
        runtime
            .expect_write()
            .withf(|_, contents| contents == b"./other\n")
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        runtime
            .expect_write()
            .withf({
                let entries_file = entries_file.clone();
                let original = original.clone();
                move |path, contents| path == entries_file && contents == original
            })
            .times(1)
            .returning(|_, _| Ok(()));
        runtime.expect_remove_dir_all().times(1).returning(|_| Ok(()));

        let mut removal = StagedRemoval::new(&runtime, &root);
        removal.add_entry(&entries_file, "./demo-1.0.artifact").unwrap();
        assert!(removal.confirm(true).unwrap());

        assert!(removal.stage().is_err());
        removal.rollback().unwrap();
        assert_eq!(removal.state(), RemovalState::RolledBack);
    }

    #[test]
    fn test_empty_plan_is_not_confirmed() {
        let runtime = MockRuntime::new();
        let mut removal = StagedRemoval::new(&runtime, &test_prefix());
        assert!(!removal.confirm(false).unwrap());
        assert_eq!(removal.state(), RemovalState::Planning);
        assert!(matches!(removal.stage(), Err(Error::RemovalState { .. })));
    }

    #[test]
    fn test_confirm_prompts_through_runtime() {
        let target = test_prefix().join("lib").join("demo");
        let mut runtime = MockRuntime::new();
        configure_mock_runtime_basics(&mut runtime);
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_confirm()
            .with(eq("Remove 1 path(s)?"))
            .times(2)
            .returning({
                let mut answers = vec![true, false].into_iter();
                move |_| Ok(answers.next().unwrap_or(false))
            });

        let mut declined = StagedRemoval::new(&runtime, &test_prefix());
        declined.add(&target).unwrap();
        let mut accepted = StagedRemoval::new(&runtime, &test_prefix());
        accepted.add(&target).unwrap();

        assert!(accepted.confirm(false).unwrap());
        assert_eq!(accepted.state(), RemovalState::Confirmed);
        assert!(!declined.confirm(false).unwrap());
        assert_eq!(declined.state(), RemovalState::Planning);
    }

    #[test]
    fn test_stage_failure_can_be_rolled_back() {
        let root = test_prefix();
        let first = root.join("a");
        let second = root.join("b");
        let staging = root.join(".pkgres-removal-x");

        let mut runtime = MockRuntime::new();
        configure_mock_runtime_basics(&mut runtime);
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_create_staging_dir()
            .returning(move |_, _| Ok(staging.clone()));
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime
            .expect_rename()
            .with(eq(first.clone()), eq(root.join(".pkgres-removal-x").join("a")))
            .times(1)
            .returning(|_, _| Ok(()));
        runtime
            .expect_rename()
            .with(eq(second.clone()), eq(root.join(".pkgres-removal-x").join("b")))
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("device busy")));
        // rollback moves the first path back
        runtime
            .expect_rename()
            .with(eq(root.join(".pkgres-removal-x").join("a")), eq(first.clone()))
            .times(1)
            .returning(|_, _| Ok(()));
        runtime.expect_remove_dir_all().times(1).returning(|_| Ok(()));

        let mut removal = StagedRemoval::new(&runtime, &root);
        removal.add(&first).unwrap();
        removal.add(&second).unwrap();
        removal.confirm(true).unwrap();

        assert!(removal.stage().is_err());
        assert_eq!(removal.state(), RemovalState::Staged);
        removal.rollback().unwrap();
        assert_eq!(removal.state(), RemovalState::RolledBack);
    }

    #[test]
    fn test_plan_serializes() {
        let mut runtime = MockRuntime::new();
        configure_mock_runtime_basics(&mut runtime);
        runtime.expect_exists().returning(|_| true);
        let mut removal = StagedRemoval::new(&runtime, &test_prefix());
        removal.add(&test_prefix().join("bin").join("demo")).unwrap();
        removal
            .add_entry(&test_prefix().join("lib").join("artifacts.entries"), "./demo-1.0.artifact")
            .unwrap();

        let json = serde_json::to_value(removal.plan()).unwrap();
        assert_eq!(json["state"], "planning");
        assert_eq!(json["paths"].as_array().unwrap().len(), 1);
        assert_eq!(json["entries"].as_object().unwrap().len(), 1);
        assert!(json["refused"].as_array().unwrap().is_empty());
    }
}
