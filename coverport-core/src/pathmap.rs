//! Reconcile source paths recorded inside a container with a local checkout.

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fs::FileSystem;

/// A single prefix rewrite. Both prefixes end with `/`, except an empty local
/// prefix, which strips the container prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    /// Prefix as recorded by the instrumented process.
    pub container_prefix: String,
    /// Replacement prefix on the analysis machine.
    pub local_prefix: String,
}

impl PathMapping {
    /// Create a mapping, normalizing both prefixes to end with `/`.
    pub fn new(container_prefix: impl Into<String>, local_prefix: impl Into<String>) -> Self {
        Self {
            container_prefix: with_trailing_slash(container_prefix.into()),
            local_prefix: with_trailing_slash(local_prefix.into()),
        }
    }

    /// Rewrite a path that starts with the container prefix; others pass through.
    pub fn apply(&self, path: &str) -> String {
        match path.strip_prefix(&self.container_prefix) {
            Some(rest) => format!("{}{rest}", self.local_prefix),
            None => path.to_string(),
        }
    }
}

/// How [`detect_prefix`] looks for a shared prefix.
#[derive(Debug, Clone, Copy)]
pub enum PrefixStrategy<'a> {
    /// Climb from the first absolute path's directory until every absolute
    /// path sits below it. The mapping strips that ancestor.
    AncestorClimb,
    /// Align unresolved paths with files under a local source root by their
    /// trailing segments.
    SuffixAlignment {
        /// Root of the local checkout.
        source_root: &'a Path,
    },
}

/// Find the single prefix rewrite for a set of recorded paths.
///
/// `Ok(None)` means the paths are used as they are.
pub fn detect_prefix(
    paths: &[String],
    strategy: PrefixStrategy<'_>,
    fs: &dyn FileSystem,
) -> Result<Option<PathMapping>> {
    match strategy {
        PrefixStrategy::AncestorClimb => Ok(common_ancestor(paths)),
        PrefixStrategy::SuffixAlignment { source_root } => align_suffixes(paths, source_root, fs),
    }
}

fn common_ancestor(paths: &[String]) -> Option<PathMapping> {
    let mut absolute = paths.iter().filter(|path| path.starts_with('/'));
    let first = absolute.next()?;
    let mut ancestor: Vec<&str> = segments(first);
    ancestor.pop();

    for path in absolute {
        let dir = {
            let mut parts = segments(path);
            parts.pop();
            parts
        };
        let shared = ancestor
            .iter()
            .zip(dir.iter())
            .take_while(|(left, right)| left == right)
            .count();
        ancestor.truncate(shared);
        if ancestor.is_empty() {
            return None;
        }
    }

    if ancestor.is_empty() {
        return None;
    }
    Some(PathMapping {
        container_prefix: format!("/{}/", ancestor.join("/")),
        local_prefix: String::new(),
    })
}

#[derive(Debug)]
struct IndexedFile {
    key: String,
    segments: Vec<String>,
}

#[derive(Debug)]
struct Nomination {
    container_root: String,
    local_root: String,
}

fn align_suffixes(
    paths: &[String],
    source_root: &Path,
    fs: &dyn FileSystem,
) -> Result<Option<PathMapping>> {
    let mut unresolved: Vec<&String> = paths
        .iter()
        .filter(|path| path.starts_with('/') && !fs.exists(Path::new(path.as_str())))
        .collect();
    if unresolved.is_empty() {
        debug!("all {} coverage paths resolve locally", paths.len());
        return Ok(None);
    }
    unresolved.sort();
    unresolved.dedup();

    let index = index_sources(source_root, fs)?;
    let root = source_root.to_string_lossy();
    let root = root.trim_end_matches('/');

    let mut groups: BTreeMap<String, Vec<Nomination>> = BTreeMap::new();
    for path in unresolved {
        let parts = segments(path);
        let Some(filename) = parts.last() else {
            continue;
        };

        let mut best: Option<(&IndexedFile, usize)> = None;
        for candidate in index
            .iter()
            .filter(|file| file.segments.last().map(String::as_str) == Some(*filename))
        {
            let score = trailing_matches(&parts, &candidate.segments);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        let Some((matched, score)) = best else {
            debug!("no local candidate for {path}");
            continue;
        };

        // Both roots drop the whole matched suffix.
        let strip = score;
        let container_keep = &parts[..parts.len() - strip];
        let local_keep = &matched.segments[..matched.segments.len() - strip];
        let nomination = Nomination {
            container_root: join_root("", container_keep),
            local_root: join_root(root, local_keep),
        };
        debug!(
            "{path} aligns with {} (score {score})",
            matched.key
        );
        groups
            .entry(nomination.container_root.clone())
            .or_default()
            .push(nomination);
    }

    let mut winner: Option<&Vec<Nomination>> = None;
    for group in groups.values() {
        if winner.is_none_or(|current| group.len() > current.len()) {
            winner = Some(group);
        }
    }

    Ok(winner
        .and_then(|group| group.first())
        .map(|nomination| PathMapping {
            container_prefix: nomination.container_root.clone(),
            local_prefix: nomination.local_root.clone(),
        }))
}

fn index_sources(source_root: &Path, fs: &dyn FileSystem) -> Result<Vec<IndexedFile>> {
    let mut index: Vec<IndexedFile> = fs
        .list_source_files(source_root)?
        .into_iter()
        .filter_map(|file| {
            let relative = file.strip_prefix(source_root).ok()?;
            let segments: Vec<String> = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect();
            if segments.is_empty() {
                return None;
            }
            Some(IndexedFile {
                key: segments.join("/"),
                segments,
            })
        })
        .collect();
    index.sort_by(|left, right| left.key.cmp(&right.key));
    Ok(index)
}

fn trailing_matches(left: &[&str], right: &[String]) -> usize {
    left.iter()
        .rev()
        .zip(right.iter().rev())
        .take_while(|(a, b)| **a == b.as_str())
        .count()
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

fn join_root<S: AsRef<str>>(base: &str, parts: &[S]) -> String {
    let mut root = base.to_string();
    for part in parts {
        root.push('/');
        root.push_str(part.as_ref());
    }
    root.push('/');
    root
}

fn with_trailing_slash(value: String) -> String {
    if value.is_empty() || value.ends_with('/') {
        value
    } else {
        format!("{value}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{MockFileSystem, StdFileSystem};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mock_fs(root: &'static str, files: &[&str]) -> MockFileSystem {
        let listed: Vec<PathBuf> = files.iter().map(|f| Path::new(root).join(f)).collect();
        let existing = listed.clone();
        let mut fs = MockFileSystem::new();
        fs.expect_exists()
            .returning(move |path| existing.iter().any(|file| file == path));
        fs.expect_list_source_files()
            .returning(move |_| Ok(listed.clone()));
        fs
    }

    fn suffix(root: &Path) -> PrefixStrategy<'_> {
        PrefixStrategy::SuffixAlignment { source_root: root }
    }

    #[test]
    fn aligns_container_root_with_checkout_in_any_order() {
        let fs = mock_fs("/work/repo", &["src/bar.go", "src/foo.go"]);
        let root = Path::new("/work/repo");
        let forward = vec!["/app/src/foo.go".to_string(), "/app/src/bar.go".to_string()];
        let reverse: Vec<String> = forward.iter().rev().cloned().collect();

        let expected = PathMapping {
            container_prefix: "/app/".to_string(),
            local_prefix: "/work/repo/".to_string(),
        };
        assert_eq!(
            detect_prefix(&forward, suffix(root), &fs).expect("forward"),
            Some(expected.clone())
        );
        assert_eq!(
            detect_prefix(&reverse, suffix(root), &fs).expect("reverse"),
            Some(expected)
        );
    }

    #[test]
    fn no_mapping_when_every_path_resolves() {
        let mut fs = MockFileSystem::new();
        fs.expect_exists().returning(|_| true);
        fs.expect_list_source_files().never();
        let paths = vec!["/work/repo/main.go".to_string()];
        let mapping = detect_prefix(&paths, suffix(Path::new("/work/repo")), &fs).expect("detect");
        assert_eq!(mapping, None);
    }

    #[test]
    fn nested_files_vote_for_the_same_root() {
        let fs = mock_fs(
            "/work/repo",
            &["src/main.go", "src/pkg/util.go", "src/pkg/http/server.go"],
        );
        let paths = vec![
            "/opt/app-root/src/pkg/http/server.go".to_string(),
            "/opt/app-root/src/main.go".to_string(),
            "/opt/app-root/src/pkg/util.go".to_string(),
        ];
        let mapping = detect_prefix(&paths, suffix(Path::new("/work/repo")), &fs)
            .expect("detect")
            .expect("mapping");
        assert_eq!(mapping.container_prefix, "/opt/app-root/");
        assert_eq!(mapping.local_prefix, "/work/repo/");
        assert_eq!(
            mapping.apply("/opt/app-root/src/pkg/http/server.go"),
            "/work/repo/src/pkg/http/server.go"
        );
        assert_eq!(mapping.apply("/elsewhere/main.go"), "/elsewhere/main.go");
    }

    #[test]
    fn equal_candidates_pick_first_local_key() {
        let fs = mock_fs("/work/repo", &["b/util.go", "a/util.go"]);
        let paths = vec!["/app/util.go".to_string()];
        let mapping = detect_prefix(&paths, suffix(Path::new("/work/repo")), &fs)
            .expect("detect")
            .expect("mapping");
        assert_eq!(mapping.container_prefix, "/app/");
        assert_eq!(mapping.local_prefix, "/work/repo/a/");
    }

    #[test]
    fn group_ties_pick_smallest_container_root() {
        let fs = mock_fs("/work/repo", &["api/a.go", "web/b.go"]);
        let paths = vec!["/srv/x/web/b.go".to_string(), "/opt/y/api/a.go".to_string()];
        let mapping = detect_prefix(&paths, suffix(Path::new("/work/repo")), &fs)
            .expect("detect")
            .expect("mapping");
        assert_eq!(mapping.container_prefix, "/opt/y/");
        assert_eq!(mapping.local_prefix, "/work/repo/");
    }

    #[test]
    fn files_at_mixed_depths_share_one_root() {
        let fs = mock_fs("/work/repo", &["main.go", "src/foo.go", "src/bar.go"]);
        let paths = vec![
            "/app/main.go".to_string(),
            "/app/src/foo.go".to_string(),
            "/app/src/bar.go".to_string(),
        ];
        let mapping = detect_prefix(&paths, suffix(Path::new("/work/repo")), &fs)
            .expect("detect")
            .expect("mapping");
        assert_eq!(
            mapping,
            PathMapping {
                container_prefix: "/app/".to_string(),
                local_prefix: "/work/repo/".to_string(),
            }
        );
        assert_eq!(mapping.apply("/app/main.go"), "/work/repo/main.go");
        assert_eq!(mapping.apply("/app/src/foo.go"), "/work/repo/src/foo.go");
        assert_eq!(mapping.apply("/app/src/bar.go"), "/work/repo/src/bar.go");
    }

    #[test]
    fn unmatched_paths_yield_no_mapping() {
        let fs = mock_fs("/work/repo", &["src/other.go"]);
        let paths = vec!["/app/src/missing.go".to_string()];
        let mapping = detect_prefix(&paths, suffix(Path::new("/work/repo")), &fs).expect("detect");
        assert_eq!(mapping, None);
    }

    #[test]
    fn ancestor_climb_strips_shared_directory() {
        let fs = MockFileSystem::new();
        let paths = vec![
            "/build/module/pkg/a.go".to_string(),
            "/build/module/cmd/main.go".to_string(),
            "relative/ignored.go".to_string(),
        ];
        let mapping = detect_prefix(&paths, PrefixStrategy::AncestorClimb, &fs)
            .expect("detect")
            .expect("mapping");
        assert_eq!(mapping.container_prefix, "/build/module/");
        assert_eq!(mapping.apply("/build/module/pkg/a.go"), "pkg/a.go");
    }

    #[test]
    fn ancestor_climb_stops_at_filesystem_root() {
        let fs = MockFileSystem::new();
        let paths = vec!["/a/x.go".to_string(), "/b/y.go".to_string()];
        assert_eq!(
            detect_prefix(&paths, PrefixStrategy::AncestorClimb, &fs).expect("detect"),
            None
        );
        let relative = vec!["github.com/org/repo/x.go".to_string()];
        assert_eq!(
            detect_prefix(&relative, PrefixStrategy::AncestorClimb, &fs).expect("detect"),
            None
        );
    }

    #[test]
    fn aligns_against_real_checkout() {
        let root = std::env::temp_dir().join(unique_dir_name());
        for file in ["src/foo.go", "src/bar.go", "node_modules/x/foo.go"] {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
            std::fs::write(&path, "package src").expect("write");
        }

        let fs = StdFileSystem::new();
        let paths = vec!["/app/src/foo.go".to_string(), "/app/src/bar.go".to_string()];
        let mapping = detect_prefix(&paths, suffix(&root), &fs)
            .expect("detect")
            .expect("mapping");
        assert_eq!(mapping.container_prefix, "/app/");
        assert_eq!(mapping.local_prefix, format!("{}/", root.to_string_lossy()));

        std::fs::remove_dir_all(&root).expect("cleanup temp dir");
    }

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn unique_dir_name() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        PathBuf::from(format!("coverport_pathmap_test_{nanos}_{count}"))
    }
}
