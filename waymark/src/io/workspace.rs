//! Project directory layout, waypoint scratch trees, and the accepted-tree
//! merge.
//!
//! The accepted tree (`src/`) is only ever mutated by [`merge_scratch`],
//! which swaps in a fully staged copy: either the whole merge lands or the
//! prior tree is left untouched.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

/// Canonical paths within one project directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub src_dir: PathBuf,
    pub waypoints_dir: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            src_dir: root.join("src"),
            waypoints_dir: root.join("waypoints"),
            root,
        }
    }

    pub fn scratch_dir(&self, waypoint_id: &str) -> PathBuf {
        self.waypoints_dir.join(waypoint_id)
    }
}

/// Create the on-disk skeleton for a new project.
pub fn init_project_layout(paths: &ProjectPaths) -> Result<()> {
    fs::create_dir_all(&paths.src_dir)
        .with_context(|| format!("create {}", paths.src_dir.display()))?;
    fs::create_dir_all(paths.src_dir.join("tests"))
        .with_context(|| format!("create {}/tests", paths.src_dir.display()))?;
    fs::create_dir_all(&paths.waypoints_dir)
        .with_context(|| format!("create {}", paths.waypoints_dir.display()))?;
    let requirements = paths.src_dir.join("requirements.txt");
    if !requirements.exists() {
        fs::write(&requirements, "").with_context(|| format!("write {}", requirements.display()))?;
    }
    Ok(())
}

/// Make a fresh scratch working copy of the accepted tree for a waypoint.
/// Any scratch left over from a previous attempt is discarded first.
pub fn create_scratch(paths: &ProjectPaths, waypoint_id: &str) -> Result<PathBuf> {
    let scratch = paths.scratch_dir(waypoint_id);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)
            .with_context(|| format!("remove stale scratch {}", scratch.display()))?;
    }
    fs::create_dir_all(&scratch).with_context(|| format!("create scratch {}", scratch.display()))?;
    copy_dir(&paths.src_dir, &scratch.join("src"))?;
    debug!(scratch = %scratch.display(), "scratch tree created");
    Ok(scratch)
}

pub fn remove_scratch(paths: &ProjectPaths, waypoint_id: &str) -> Result<()> {
    let scratch = paths.scratch_dir(waypoint_id);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)
            .with_context(|| format!("remove scratch {}", scratch.display()))?;
    }
    Ok(())
}

/// Write one candidate file into the scratch tree. `relative` must stay
/// inside the scratch root; absolute paths and `..` traversal are refused.
pub fn write_candidate_file(scratch: &Path, relative: &str, contents: &str) -> Result<()> {
    let rel = Path::new(relative);
    if rel.is_absolute() {
        bail!("candidate path '{relative}' must be relative");
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("candidate path '{relative}' escapes the working tree"),
        }
    }
    let target = scratch.join(rel);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&target, contents).with_context(|| format!("write {}", target.display()))?;
    Ok(())
}

/// Merge newly declared dependencies into the scratch tree's
/// `src/requirements.txt`, sorted and de-duplicated.
pub fn merge_requirements(scratch: &Path, declared: &[String]) -> Result<()> {
    if declared.is_empty() {
        return Ok(());
    }
    let path = scratch.join("src").join("requirements.txt");
    let mut entries: BTreeSet<String> = if path.exists() {
        fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    } else {
        BTreeSet::new()
    };
    for dep in declared {
        let dep = dep.trim();
        if !dep.is_empty() {
            entries.insert(dep.to_string());
        }
    }
    let mut buf = entries.into_iter().collect::<Vec<_>>().join("\n");
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Replace the accepted tree with the scratch tree's `src/`.
///
/// The scratch content is staged into a sibling directory first, then swapped
/// in with two renames. If the swap cannot complete, the previous accepted
/// tree is restored before the error propagates.
pub fn merge_scratch(paths: &ProjectPaths, scratch: &Path) -> Result<()> {
    let scratch_src = scratch.join("src");
    if !scratch_src.exists() {
        bail!("scratch tree {} has no src directory", scratch.display());
    }

    let stage = paths.root.join(".merge-stage");
    let displaced = paths.root.join(".src-displaced");
    if stage.exists() {
        fs::remove_dir_all(&stage).with_context(|| format!("remove {}", stage.display()))?;
    }
    if displaced.exists() {
        fs::remove_dir_all(&displaced)
            .with_context(|| format!("remove {}", displaced.display()))?;
    }

    copy_dir(&scratch_src, &stage)?;

    fs::rename(&paths.src_dir, &displaced)
        .with_context(|| format!("displace {}", paths.src_dir.display()))?;
    if let Err(err) = fs::rename(&stage, &paths.src_dir) {
        // Put the old tree back; the merge must be all-or-nothing.
        fs::rename(&displaced, &paths.src_dir)
            .with_context(|| format!("restore {}", paths.src_dir.display()))?;
        let _ = fs::remove_dir_all(&stage);
        return Err(err).with_context(|| format!("swap in {}", paths.src_dir.display()));
    }
    fs::remove_dir_all(&displaced)
        .with_context(|| format!("remove displaced tree {}", displaced.display()))?;
    debug!(src = %paths.src_dir.display(), "accepted tree updated");
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).with_context(|| format!("create {}", to.display()))?;
    for entry in fs::read_dir(from).with_context(|| format!("read dir {}", from.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", from.display()))?;
        let target = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        } else {
            return Err(anyhow!(
                "unsupported file type at {} (symlinks are not copied)",
                entry.path().display()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(temp: &Path) -> ProjectPaths {
        let paths = ProjectPaths::new(temp.join("proj"));
        init_project_layout(&paths).expect("init layout");
        paths
    }

    #[test]
    fn scratch_copies_accepted_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = project(temp.path());
        fs::write(paths.src_dir.join("app.py"), "print('hi')\n").expect("write");

        let scratch = create_scratch(&paths, "wp_001").expect("scratch");
        assert!(scratch.join("src/app.py").exists());
        assert!(scratch.join("src/requirements.txt").exists());
    }

    #[test]
    fn candidate_write_refuses_traversal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scratch = temp.path().join("scratch");
        fs::create_dir_all(&scratch).expect("mkdir");

        assert!(write_candidate_file(&scratch, "src/ok.py", "x = 1\n").is_ok());
        assert!(write_candidate_file(&scratch, "../escape.py", "").is_err());
        assert!(write_candidate_file(&scratch, "/etc/passwd", "").is_err());
    }

    #[test]
    fn merge_replaces_accepted_tree_completely() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = project(temp.path());
        fs::write(paths.src_dir.join("stale.py"), "old\n").expect("write");

        let scratch = create_scratch(&paths, "wp_001").expect("scratch");
        fs::remove_file(scratch.join("src/stale.py")).expect("remove in scratch");
        write_candidate_file(&scratch, "src/new.py", "new\n").expect("candidate");

        merge_scratch(&paths, &scratch).expect("merge");
        assert!(paths.src_dir.join("new.py").exists());
        assert!(!paths.src_dir.join("stale.py").exists());
        assert!(!paths.root.join(".merge-stage").exists());
        assert!(!paths.root.join(".src-displaced").exists());
    }

    #[test]
    fn requirements_merge_is_sorted_and_deduplicated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = project(temp.path());
        let scratch = create_scratch(&paths, "wp_001").expect("scratch");
        fs::write(scratch.join("src/requirements.txt"), "requests\n").expect("seed");

        merge_requirements(
            &scratch,
            &["flask".to_string(), "requests".to_string(), " ".to_string()],
        )
        .expect("merge");
        let contents = fs::read_to_string(scratch.join("src/requirements.txt")).expect("read");
        assert_eq!(contents, "flask\nrequests\n");
    }
}
